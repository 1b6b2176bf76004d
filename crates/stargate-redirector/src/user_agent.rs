use woothee::parser::Parser;

/// Label for anything the classifier does not recognise.
pub const UNKNOWN: &str = "Unknown";

/// Browser, OS and device class derived from a `User-Agent` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub browser: String,
    pub os: String,
    pub device: String,
}

impl DeviceInfo {
    /// Classifies a user agent with woothee and folds its labels onto the
    /// fixed browser, OS and device vocabularies the stats tables use.
    pub fn parse(user_agent: &str) -> Self {
        if user_agent.trim().is_empty() {
            return Self::unknown();
        }
        let result = Parser::new().parse(user_agent).unwrap_or_default();
        Self {
            browser: browser(&result.name).to_string(),
            os: os(&result.os).to_string(),
            device: device(&result.category, &result.os).to_string(),
        }
    }

    pub fn unknown() -> Self {
        Self {
            browser: UNKNOWN.to_string(),
            os: UNKNOWN.to_string(),
            device: UNKNOWN.to_string(),
        }
    }
}

fn browser(name: &str) -> &'static str {
    match name {
        "Chrome" => "Chrome",
        "Firefox" => "Firefox",
        "Safari" => "Safari",
        "Edge" => "Edge",
        "Opera" => "Opera",
        "Internet Explorer" => "Internet Explorer",
        _ => UNKNOWN,
    }
}

fn os(name: &str) -> &'static str {
    match name {
        name if name.starts_with("Windows") => "Windows",
        "Mac OSX" | "Mac OS Classic" => "macOS",
        "iPhone" | "iPad" | "iPod" | "iOS" => "iOS",
        "Android" => "Android",
        "Linux" | "ChromeOS" => "Linux",
        _ => UNKNOWN,
    }
}

/// woothee has no tablet class; an iPad reports as a smartphone.
fn device(category: &str, os: &str) -> &'static str {
    match category {
        "crawler" => "Bot",
        "smartphone" | "mobilephone" if os == "iPad" => "Tablet",
        "smartphone" | "mobilephone" => "Mobile",
        "pc" | "appliance" | "misc" => "PC",
        _ => UNKNOWN,
    }
}
