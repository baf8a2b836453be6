//! Per-call data seen by the admission layer.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Quota token charged when a complexity implementation has no opinion.
pub const DEFAULT_TOKEN: &str = "default";

/// Metadata about one inbound unary call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    full_method: String,
    received_at: Instant,
    deadline: Option<Instant>,
}

impl CallInfo {
    /// Describe a call to `full_method` (`/package.Service/Method`) arriving now.
    pub fn new(full_method: impl Into<String>) -> Self {
        Self { full_method: full_method.into(), received_at: Instant::now(), deadline: None }
    }

    /// Override the arrival instant. Quota waits are measured from here.
    pub fn received_at(mut self, at: Instant) -> Self {
        self.received_at = at;
        self
    }

    /// Attach a call-level deadline, e.g. one propagated by the client.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Attach a call-level timeout relative to arrival.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match self.received_at.checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Fully-qualified method path.
    pub fn full_method(&self) -> &str {
        &self.full_method
    }

    /// Arrival instant.
    pub fn arrival(&self) -> Instant {
        self.received_at
    }

    /// Call-level deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Split the method path into `(service, method)`.
    pub fn service_and_method(&self) -> Option<(&str, &str)> {
        parse_full_method(&self.full_method)
    }
}

/// Split `/package.Service/Method` into `("package.Service", "Method")`.
///
/// Exactly three `/`-separated segments are required; anything else is `None`.
pub fn parse_full_method(full_method: &str) -> Option<(&str, &str)> {
    let mut parts = full_method.split('/');
    let (_, service, method) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    Some((service, method))
}

/// A unary call travelling through the tower stack: metadata plus the decoded request.
#[derive(Debug, Clone)]
pub struct UnaryCall<M> {
    /// Call metadata.
    pub info: CallInfo,
    /// Decoded request message.
    pub message: M,
}

impl<M> UnaryCall<M> {
    /// Pair `message` with metadata for `full_method`, arriving now.
    pub fn new(full_method: impl Into<String>, message: M) -> Self {
        Self { info: CallInfo::new(full_method), message }
    }

    /// Pair `message` with existing metadata.
    pub fn from_parts(info: CallInfo, message: M) -> Self {
        Self { info, message }
    }

    /// Split back into metadata and message.
    pub fn into_parts(self) -> (CallInfo, M) {
        (self.info, self.message)
    }
}

/// Token name → weight charged by one call.
///
/// Iteration follows insertion order. Inserting a token twice keeps its first
/// position and replaces its weight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightMap {
    entries: Vec<(String, u64)>,
}

impl WeightMap {
    /// An empty map: the call is not limited.
    pub fn new() -> Self {
        Self::default()
    }

    /// `{"default": 1}`, the weight generated default implementations charge.
    pub fn unit() -> Self {
        Self::new().with(DEFAULT_TOKEN, 1)
    }

    /// Builder-style insert.
    pub fn with(mut self, token: impl Into<String>, weight: u64) -> Self {
        self.insert(token, weight);
        self
    }

    /// Set the weight of `token`, returning the previous weight.
    pub fn insert(&mut self, token: impl Into<String>, weight: u64) -> Option<u64> {
        let token = token.into();
        match self.entries.iter_mut().find(|(t, _)| *t == token) {
            Some((_, w)) => Some(std::mem::replace(w, weight)),
            None => {
                self.entries.push((token, weight));
                None
            }
        }
    }

    /// Weight charged to `token`.
    pub fn get(&self, token: &str) -> Option<u64> {
        self.entries.iter().find(|(t, _)| t == token).map(|(_, w)| *w)
    }

    /// Iterate `(token, weight)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(t, w)| (t.as_str(), *w))
    }

    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no token is charged.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, u64)> for WeightMap {
    fn from_iter<I: IntoIterator<Item = (K, u64)>>(iter: I) -> Self {
        let mut map = WeightMap::new();
        for (token, weight) in iter {
            map.insert(token, weight);
        }
        map
    }
}

impl<K: Into<String>> From<HashMap<K, u64>> for WeightMap {
    fn from(map: HashMap<K, u64>) -> Self {
        map.into_iter().collect()
    }
}

impl IntoIterator for WeightMap {
    type Item = (String, u64);
    type IntoIter = std::vec::IntoIter<(String, u64)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_segment_paths() {
        assert_eq!(
            parse_full_method("/helloworld.Greeter/SayHello"),
            Some(("helloworld.Greeter", "SayHello"))
        );
        assert_eq!(parse_full_method("x/svc/m"), Some(("svc", "m")));
    }

    #[test]
    fn rejects_other_shapes() {
        assert_eq!(parse_full_method(""), None);
        assert_eq!(parse_full_method("/SayHello"), None);
        assert_eq!(parse_full_method("/a/b/c"), None);
    }

    #[test]
    fn weight_map_keeps_order_and_replaces_in_place() {
        let mut map = WeightMap::new().with("cpu", 2).with("db", 5);
        assert_eq!(map.insert("cpu", 7), Some(2));
        let pairs: Vec<_> = map.iter().collect();
        assert_eq!(pairs, vec![("cpu", 7), ("db", 5)]);
        assert_eq!(map.get("db"), Some(5));
        assert_eq!(map.get("nope"), None);
    }

    #[test]
    fn unit_charges_default_token() {
        let map = WeightMap::unit();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(DEFAULT_TOKEN), Some(1));
    }

    #[test]
    fn with_timeout_sets_deadline_from_arrival() {
        let at = Instant::now();
        let info = CallInfo::new("/s/m").received_at(at).with_timeout(Duration::from_secs(2));
        assert_eq!(info.deadline(), Some(at + Duration::from_secs(2)));
        assert_eq!(info.service_and_method(), Some(("s", "m")));
    }
}
