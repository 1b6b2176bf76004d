use stargate_redirector::Redirector;
use stargate_shortener::LinkService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    redirector: Arc<dyn Redirector>,
    links: Arc<LinkService>,
}

impl AppState {
    pub fn new(redirector: Arc<dyn Redirector>, links: Arc<LinkService>) -> Self {
        Self { redirector, links }
    }

    pub fn redirector(&self) -> &dyn Redirector {
        self.redirector.as_ref()
    }

    pub fn links(&self) -> &LinkService {
        &self.links
    }
}
