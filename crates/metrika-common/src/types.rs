use crate::error::MetricError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metric kind, as written on the wire and in storage.
///
/// # Examples
///
/// ```
/// use metrika_common::MetricKind;
///
/// let kind: MetricKind = "counter".parse().unwrap();
/// assert_eq!(kind, MetricKind::Counter);
/// assert_eq!(kind.to_string(), "counter");
/// assert!("Counter".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            _ => Err(MetricError::InvalidKind(s.to_string())),
        }
    }
}

/// Value type of a metric kind.
///
/// `f64` is the gauge value and `i64` the counter value. The kind is a
/// property of the type, so a stored metric can never switch kinds.
pub trait MetricValue: Copy + PartialEq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    const KIND: MetricKind;

    /// Parses the raw text form used in `/update/{kind}/{id}/{value}`.
    fn parse_raw(raw: &str) -> Result<Self, MetricError>;

    /// Combines a stored value with an incoming write.
    ///
    /// Gauges replace, counters add.
    fn merge(stored: Self, incoming: Self) -> Result<Self, MetricError>;

    fn into_payload(self) -> Payload;

    fn from_payload(payload: Payload) -> Option<Self>;

    /// Shortest decimal text that round-trips, e.g. `1.5`, `12`, `-3`.
    fn format_raw(&self) -> String {
        self.to_string()
    }
}

impl MetricValue for f64 {
    const KIND: MetricKind = MetricKind::Gauge;

    fn parse_raw(raw: &str) -> Result<Self, MetricError> {
        let value: f64 = raw
            .trim()
            .parse()
            .map_err(|_| MetricError::InvalidValue(format!("{raw:?} is not a number")))?;
        if !value.is_finite() {
            return Err(MetricError::InvalidValue(format!("{raw:?} is not finite")));
        }
        Ok(value)
    }

    fn merge(_stored: Self, incoming: Self) -> Result<Self, MetricError> {
        Ok(incoming)
    }

    fn into_payload(self) -> Payload {
        Payload::Gauge(self)
    }

    fn from_payload(payload: Payload) -> Option<Self> {
        match payload {
            Payload::Gauge(value) => Some(value),
            Payload::Counter(_) => None,
        }
    }
}

impl MetricValue for i64 {
    const KIND: MetricKind = MetricKind::Counter;

    fn parse_raw(raw: &str) -> Result<Self, MetricError> {
        raw.trim()
            .parse()
            .map_err(|_| MetricError::InvalidValue(format!("{raw:?} is not an integer")))
    }

    fn merge(stored: Self, incoming: Self) -> Result<Self, MetricError> {
        stored
            .checked_add(incoming)
            .ok_or(MetricError::CounterOverflow {
                stored,
                delta: incoming,
            })
    }

    fn into_payload(self) -> Payload {
        Payload::Counter(self)
    }

    fn from_payload(payload: Payload) -> Option<Self> {
        match payload {
            Payload::Counter(delta) => Some(delta),
            Payload::Gauge(_) => None,
        }
    }
}

/// A stored metric: identity plus the current value of its kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric<T: MetricValue> {
    pub id: String,
    pub value: T,
}

impl<T: MetricValue> Metric<T> {
    pub fn new(id: impl Into<String>, value: T) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }

    pub fn kind(&self) -> MetricKind {
        T::KIND
    }

    pub fn to_dto(&self) -> MetricsDto {
        MetricsDto {
            id: self.id.clone(),
            payload: self.value.into_payload(),
        }
    }
}

/// Value carried by a [`MetricsDto`]; the variant is the kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    Gauge(f64),
    Counter(i64),
}

impl Payload {
    pub fn kind(&self) -> MetricKind {
        match self {
            Payload::Gauge(_) => MetricKind::Gauge,
            Payload::Counter(_) => MetricKind::Counter,
        }
    }

    pub fn format_raw(&self) -> String {
        match self {
            Payload::Gauge(value) => value.format_raw(),
            Payload::Counter(delta) => delta.format_raw(),
        }
    }
}

/// A metric as exchanged on the wire, in batches and in dump files.
///
/// Serializes through [`WireMetric`], so the JSON form is
/// `{"id":"g1","kind":"gauge","value":1.5}` or
/// `{"id":"c1","kind":"counter","delta":3}`.
///
/// # Examples
///
/// ```
/// use metrika_common::{MetricsDto, Payload};
///
/// let dto: MetricsDto = serde_json::from_str(r#"{"id":"c1","type":"counter","delta":3}"#).unwrap();
/// assert_eq!(dto.payload, Payload::Counter(3));
///
/// let bad = serde_json::from_str::<MetricsDto>(r#"{"id":"c1","kind":"counter","value":3.0}"#);
/// assert!(bad.is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireMetric", into = "WireMetric")]
pub struct MetricsDto {
    pub id: String,
    pub payload: Payload,
}

impl MetricsDto {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            payload: Payload::Gauge(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            payload: Payload::Counter(delta),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.payload.kind()
    }
}

/// Loose JSON shape of a metric before validation.
///
/// Handlers parse request bodies into this type first so that malformed JSON
/// and semantically invalid metrics can be told apart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireMetric {
    #[serde(default)]
    pub id: String,
    #[serde(default, alias = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
}

impl WireMetric {
    /// Validates the identity part only, as needed by value lookups.
    pub fn lookup(&self) -> Result<(MetricKind, &str), MetricError> {
        if self.id.is_empty() {
            return Err(MetricError::MissingId);
        }
        let kind = self.kind.parse()?;
        Ok((kind, self.id.as_str()))
    }
}

impl TryFrom<WireMetric> for MetricsDto {
    type Error = MetricError;

    fn try_from(wire: WireMetric) -> Result<Self, Self::Error> {
        let (kind, _) = wire.lookup()?;
        let payload = match (kind, wire.value, wire.delta) {
            (MetricKind::Gauge, Some(value), None) if value.is_finite() => Payload::Gauge(value),
            (MetricKind::Counter, None, Some(delta)) => Payload::Counter(delta),
            (kind, value, delta) => {
                return Err(MetricError::InvalidValue(format!(
                    "{kind} expects exactly one {} field (value={value:?}, delta={delta:?})",
                    match kind {
                        MetricKind::Gauge => "value",
                        MetricKind::Counter => "delta",
                    }
                )))
            }
        };
        Ok(MetricsDto {
            id: wire.id,
            payload,
        })
    }
}

impl From<MetricsDto> for WireMetric {
    fn from(dto: MetricsDto) -> Self {
        let (value, delta) = match dto.payload {
            Payload::Gauge(value) => (Some(value), None),
            Payload::Counter(delta) => (None, Some(delta)),
        };
        WireMetric {
            id: dto.id,
            kind: dto.payload.kind().to_string(),
            value,
            delta,
        }
    }
}
