//! All Paths are recorded here for use throughout this codebase
pub mod base {
    pub const ROOT: &str = "/";
    pub const HEALTH: &str = "/health";
    pub const ABOUT: &str = "/about";
}

pub mod webhooks {
    pub const ENQUEUE: &str = "/webhooks/enqueue";
    pub const CONFIG: &str = "/webhooks/config";
    pub const DESTINATIONS: &str = "/webhooks/destinations";
    /// Destination urls travel in the `url` query parameter
    pub const DESTINATION: &str = "/webhooks/destination";
}

pub const NOTIFICATIONS: &str = "/notifications";

pub fn destination_query_path(url: &str) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query.append_pair("url", url);
    format!("{}?{}", webhooks::DESTINATION, query.finish())
}
