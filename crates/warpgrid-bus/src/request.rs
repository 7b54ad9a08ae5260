use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
pub use http::Method;

use crate::header::HeaderMap;

/// Workspace identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WsId(pub u64);

impl fmt::Display for WsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Application partition number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(pub u16);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Qualified application name, written `owner/name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AppQName {
    owner: String,
    name: String,
}

impl AppQName {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.owner.is_empty() && self.name.is_empty()
    }
}

impl fmt::Display for AppQName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid application name {0:?}: expected owner/name")]
pub struct ParseAppQNameError(String);

impl FromStr for AppQName {
    type Err = ParseAppQNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(owner, name))
            }
            _ => Err(ParseAppQNameError(s.to_string())),
        }
    }
}

/// A request travelling through the bus.
///
/// The handler receives it by value and treats it as read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub resource: String,
    pub header: HeaderMap,
    pub query: HashMap<String, String>,
    pub body: Bytes,
    pub wsid: WsId,
    pub partition: PartitionId,
    /// Attachment name to BLOB id.
    pub attachments: HashMap<String, u64>,
    pub app: AppQName,
    pub host: String,
}

impl Request {
    pub fn new(method: Method, resource: impl Into<String>) -> Self {
        Self {
            method,
            resource: resource.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.set(name, value);
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_wsid(mut self, wsid: WsId) -> Self {
        self.wsid = wsid;
        self
    }

    pub fn with_partition(mut self, partition: PartitionId) -> Self {
        self.partition = partition;
        self
    }

    pub fn with_attachment(mut self, name: impl Into<String>, blob_id: u64) -> Self {
        self.attachments.insert(name.into(), blob_id);
        self
    }

    pub fn with_app(mut self, app: AppQName) -> Self {
        self.app = app;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{APPLICATION_JSON, CONTENT_TYPE};

    #[test]
    fn default_request_is_empty_get() {
        let req = Request::default();
        assert_eq!(req.method, Method::GET);
        assert!(req.resource.is_empty());
        assert!(req.body.is_empty());
        assert!(req.app.is_empty());
    }

    #[test]
    fn builder_sets_every_field() {
        let app: AppQName = "test1/app1".parse().unwrap();
        let req = Request::new(Method::POST, "c.sys.CUD")
            .with_header(CONTENT_TYPE, APPLICATION_JSON)
            .with_query("param", "value")
            .with_body("body")
            .with_wsid(WsId(1))
            .with_partition(PartitionId(3))
            .with_attachment("photo", 42)
            .with_app(app.clone())
            .with_host("localhost");

        assert_eq!(req.method, Method::POST);
        assert_eq!(req.resource, "c.sys.CUD");
        assert_eq!(req.header.get("content-type"), Some(APPLICATION_JSON));
        assert_eq!(req.query.get("param").map(String::as_str), Some("value"));
        assert_eq!(req.body.as_ref(), b"body");
        assert_eq!(req.wsid, WsId(1));
        assert_eq!(req.partition, PartitionId(3));
        assert_eq!(req.attachments.get("photo"), Some(&42));
        assert_eq!(req.app, app);
        assert_eq!(req.host, "localhost");
    }

    #[test]
    fn app_qname_parse_and_display() {
        let app: AppQName = "sys/cluster".parse().unwrap();
        assert_eq!(app.owner(), "sys");
        assert_eq!(app.name(), "cluster");
        assert_eq!(app.to_string(), "sys/cluster");
    }

    #[test]
    fn app_qname_rejects_malformed() {
        assert!("cluster".parse::<AppQName>().is_err());
        assert!("/cluster".parse::<AppQName>().is_err());
        assert!("sys/".parse::<AppQName>().is_err());
        assert!("a/b/c".parse::<AppQName>().is_err());
    }
}
