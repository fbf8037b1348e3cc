//! Protobuf wire types of the store API and the service trait.
//!
//! The messages are declared with prost derives so no build step is needed.
//! Field tags follow the Thanos `storepb` definitions.

use bytes::Bytes;
use prost::Message;
use tonic::{Request, Response, Status};

use common::StoreKind;

use crate::chunkenc::EncodedChunk;
use crate::labels::{self, Labels, Matcher, MatcherOp};

#[derive(Clone, PartialEq, Eq, Hash, Message)]
pub struct Label {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct LabelMatcher {
    #[prost(enumeration = "label_matcher::Type", tag = "1")]
    pub r#type: i32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub value: String,
}

pub mod label_matcher {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Type {
        Eq = 0,
        Neq = 1,
        Re = 2,
        Nre = 3,
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Chunk {
    #[prost(enumeration = "chunk::Encoding", tag = "1")]
    pub r#type: i32,
    #[prost(bytes = "bytes", tag = "2")]
    pub data: Bytes,
}

pub mod chunk {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Encoding {
        Xor = 0,
    }
}

/// Encoded samples of one time range of a series.
#[derive(Clone, PartialEq, Message)]
pub struct AggrChunk {
    #[prost(int64, tag = "1")]
    pub min_time: i64,
    #[prost(int64, tag = "2")]
    pub max_time: i64,
    #[prost(message, optional, tag = "3")]
    pub raw: Option<Chunk>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Series {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "2")]
    pub chunks: Vec<AggrChunk>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SeriesRequest {
    #[prost(int64, tag = "1")]
    pub min_time: i64,
    #[prost(int64, tag = "2")]
    pub max_time: i64,
    #[prost(message, repeated, tag = "3")]
    pub matchers: Vec<LabelMatcher>,
    #[prost(int64, tag = "4")]
    pub max_resolution_window: i64,
    #[prost(enumeration = "PartialResponseStrategy", tag = "5")]
    pub partial_response_strategy: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct SeriesResponse {
    #[prost(oneof = "series_response::Result", tags = "1, 2")]
    pub result: Option<series_response::Result>,
}

pub mod series_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Series(super::Series),
        #[prost(string, tag = "2")]
        Warning(String),
    }
}

impl SeriesResponse {
    pub fn series(series: Series) -> Self {
        Self {
            result: Some(series_response::Result::Series(series)),
        }
    }

    pub fn warning(warning: impl Into<String>) -> Self {
        Self {
            result: Some(series_response::Result::Warning(warning.into())),
        }
    }

    pub fn as_series(&self) -> Option<&Series> {
        match &self.result {
            Some(series_response::Result::Series(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_warning(&self) -> Option<&str> {
        match &self.result {
            Some(series_response::Result::Warning(w)) => Some(w),
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct InfoRequest {}

#[derive(Clone, PartialEq, Message)]
pub struct InfoResponse {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(int64, tag = "2")]
    pub min_time: i64,
    #[prost(int64, tag = "3")]
    pub max_time: i64,
    #[prost(enumeration = "StoreType", tag = "4")]
    pub store_type: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct LabelNamesRequest {
    #[prost(enumeration = "PartialResponseStrategy", tag = "1")]
    pub partial_response_strategy: i32,
    /// Unset means the store's whole time range.
    #[prost(int64, optional, tag = "2")]
    pub start: Option<i64>,
    #[prost(int64, optional, tag = "3")]
    pub end: Option<i64>,
    #[prost(message, repeated, tag = "4")]
    pub matchers: Vec<LabelMatcher>,
}

#[derive(Clone, PartialEq, Message)]
pub struct LabelNamesResponse {
    #[prost(string, repeated, tag = "1")]
    pub names: Vec<String>,
    #[prost(string, repeated, tag = "2")]
    pub warnings: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct LabelValuesRequest {
    #[prost(string, tag = "1")]
    pub label: String,
    #[prost(enumeration = "PartialResponseStrategy", tag = "2")]
    pub partial_response_strategy: i32,
    #[prost(int64, optional, tag = "3")]
    pub start: Option<i64>,
    #[prost(int64, optional, tag = "4")]
    pub end: Option<i64>,
    #[prost(message, repeated, tag = "5")]
    pub matchers: Vec<LabelMatcher>,
}

#[derive(Clone, PartialEq, Message)]
pub struct LabelValuesResponse {
    #[prost(string, repeated, tag = "1")]
    pub values: Vec<String>,
    #[prost(string, repeated, tag = "2")]
    pub warnings: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum StoreType {
    Unknown = 0,
    Query = 1,
    Rule = 2,
    Sidecar = 3,
    Store = 4,
    Receive = 5,
}

impl From<StoreKind> for StoreType {
    fn from(kind: StoreKind) -> Self {
        match kind {
            StoreKind::Query => Self::Query,
            StoreKind::Rule => Self::Rule,
            StoreKind::Sidecar => Self::Sidecar,
            StoreKind::Store => Self::Store,
            StoreKind::Receive => Self::Receive,
        }
    }
}

/// How a request treats failures that affect only part of the data.
///
/// There is no implicit default: requests must pick one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PartialResponseStrategy {
    Unspecified = 0,
    /// Report partial failures as warnings and continue.
    Warn = 1,
    /// Fail the whole request on any partial failure.
    Abort = 2,
}

impl From<&Label> for labels::Label {
    fn from(l: &Label) -> Self {
        labels::Label::new(l.name.clone(), l.value.clone())
    }
}

impl From<&labels::Label> for Label {
    fn from(l: &labels::Label) -> Self {
        Label {
            name: l.name.clone(),
            value: l.value.clone(),
        }
    }
}

pub fn labels_to_proto(labels: &Labels) -> Vec<Label> {
    labels.iter().map(Label::from).collect()
}

pub fn labels_from_proto(labels: &[Label]) -> Labels {
    Labels::new(labels.iter().map(labels::Label::from))
}

impl TryFrom<&LabelMatcher> for Matcher {
    type Error = String;

    fn try_from(m: &LabelMatcher) -> Result<Self, Self::Error> {
        let op = match label_matcher::Type::try_from(m.r#type) {
            Ok(label_matcher::Type::Eq) => MatcherOp::Equal,
            Ok(label_matcher::Type::Neq) => MatcherOp::NotEqual,
            Ok(label_matcher::Type::Re) => MatcherOp::RegexMatch,
            Ok(label_matcher::Type::Nre) => MatcherOp::RegexNotMatch,
            Err(_) => return Err(format!("unknown matcher type {}", m.r#type)),
        };
        Matcher::new(op, m.name.clone(), m.value.clone())
            .map_err(|e| format!("invalid matcher {}{}{:?}: {e}", m.name, op, m.value))
    }
}

impl From<&Matcher> for LabelMatcher {
    fn from(m: &Matcher) -> Self {
        let r#type = match m.op {
            MatcherOp::Equal => label_matcher::Type::Eq,
            MatcherOp::NotEqual => label_matcher::Type::Neq,
            MatcherOp::RegexMatch => label_matcher::Type::Re,
            MatcherOp::RegexNotMatch => label_matcher::Type::Nre,
        };
        LabelMatcher {
            r#type: r#type as i32,
            name: m.name.clone(),
            value: m.value.clone(),
        }
    }
}

impl From<EncodedChunk> for AggrChunk {
    fn from(c: EncodedChunk) -> Self {
        AggrChunk {
            min_time: c.min_time,
            max_time: c.max_time,
            raw: Some(Chunk {
                r#type: chunk::Encoding::Xor as i32,
                data: c.data,
            }),
        }
    }
}

/// The store API, shaped like a tonic server trait.
#[tonic::async_trait]
pub trait Store: Send + Sync + 'static {
    /// Static description of the store.
    async fn info(&self, request: Request<InfoRequest>) -> Result<Response<InfoResponse>, Status>;

    type SeriesStream: futures::Stream<Item = Result<SeriesResponse, Status>> + Send + 'static;

    /// Stream series matching the request, each with its encoded chunks.
    async fn series(
        &self,
        request: Request<SeriesRequest>,
    ) -> Result<Response<Self::SeriesStream>, Status>;

    async fn label_names(
        &self,
        request: Request<LabelNamesRequest>,
    ) -> Result<Response<LabelNamesResponse>, Status>;

    async fn label_values(
        &self,
        request: Request<LabelValuesRequest>,
    ) -> Result<Response<LabelValuesResponse>, Status>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_response_wire_round_trip() {
        let resp = SeriesResponse::series(Series {
            labels: vec![Label {
                name: "foo".to_string(),
                value: "bar".to_string(),
            }],
            chunks: vec![AggrChunk {
                min_time: 1,
                max_time: 2,
                raw: Some(Chunk {
                    r#type: chunk::Encoding::Xor as i32,
                    data: Bytes::from_static(&[0, 1, 2]),
                }),
            }],
        });

        let decoded = SeriesResponse::decode(resp.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, resp);
        assert!(decoded.as_warning().is_none());
        assert_eq!(decoded.as_series().unwrap().labels[0].name, "foo");

        let warning = SeriesResponse::warning("partial");
        let decoded = SeriesResponse::decode(warning.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.as_warning(), Some("partial"));
    }

    #[test]
    fn test_unset_optional_range() {
        let req = LabelNamesRequest {
            partial_response_strategy: PartialResponseStrategy::Warn as i32,
            ..Default::default()
        };
        let decoded = LabelNamesRequest::decode(req.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.start, None);
        assert_eq!(decoded.end, None);

        let req = LabelNamesRequest {
            start: Some(0),
            ..req
        };
        let decoded = LabelNamesRequest::decode(req.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.start, Some(0));
    }

    #[test]
    fn test_matcher_conversion() {
        let proto = LabelMatcher {
            r#type: label_matcher::Type::Re as i32,
            name: "job".to_string(),
            value: "api|web".to_string(),
        };
        let m = Matcher::try_from(&proto).unwrap();
        assert!(m.matches("web"));
        assert_eq!(LabelMatcher::from(&m), proto);

        let bad = LabelMatcher {
            r#type: label_matcher::Type::Re as i32,
            name: "job".to_string(),
            value: "(".to_string(),
        };
        let err = Matcher::try_from(&bad).unwrap_err();
        assert!(err.contains("invalid matcher"));

        let unknown = LabelMatcher {
            r#type: 42,
            ..proto
        };
        let err = Matcher::try_from(&unknown).unwrap_err();
        assert!(err.contains("unknown matcher type"));
    }

    #[test]
    fn test_store_type_from_config() {
        assert_eq!(StoreType::from(StoreKind::Rule), StoreType::Rule);
        assert_eq!(StoreType::from(StoreKind::Sidecar) as i32, 3);
    }
}
