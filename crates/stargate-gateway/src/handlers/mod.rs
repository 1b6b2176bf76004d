mod health;
mod link;
mod redirect;

pub use health::health_handler;
pub use link::{
    create_link_handler, delete_link_handler, disable_link_handler, enable_link_handler,
    get_link_handler, rebuild_filter_handler,
};
pub use redirect::redirect_handler;
