//! Request Classification
//!
//! Default `RequestClassifier`: reads the item id and the nonce marker from
//! the query string of a request URL.

use crate::domain::ports::RequestClassifier;

/// Query parameter naming the viewed item
pub const ITEM_PARAM: &str = "item";
/// Query parameter whose presence marks a request as dynamic
pub const NONCE_PARAM: &str = "_";

/// Classifies requests by their URL query parameters.
///
/// Parameters with empty values are treated as absent.
#[derive(Debug, Clone)]
pub struct QueryParamClassifier {
    item_param: String,
    nonce_param: String,
}

impl Default for QueryParamClassifier {
    fn default() -> Self {
        Self::new(ITEM_PARAM, NONCE_PARAM)
    }
}

impl QueryParamClassifier {
    /// Create a classifier with custom parameter names
    pub fn new(item_param: impl Into<String>, nonce_param: impl Into<String>) -> Self {
        Self {
            item_param: item_param.into(),
            nonce_param: nonce_param.into(),
        }
    }

    /// First non-empty decoded value of a query parameter
    fn param(&self, request: &str, name: &str) -> Option<String> {
        let query = request.split_once('?')?.1;
        let query = query.split('#').next().unwrap_or(query);

        query
            .split(['&', ';'])
            .filter_map(|pair| {
                let (key, value) = pair.split_once('=')?;
                (decode(key)? == name).then(|| decode(value)).flatten()
            })
            .find(|value| !value.is_empty())
    }
}

/// Decode one form-encoded query component
fn decode(raw: &str) -> Option<String> {
    urlencoding::decode(&raw.replace('+', " "))
        .ok()
        .map(|decoded| decoded.into_owned())
}

impl RequestClassifier for QueryParamClassifier {
    fn item_id(&self, request: &str) -> Option<String> {
        self.param(request, &self.item_param)
    }

    fn is_dynamic(&self, request: &str) -> bool {
        self.param(request, &self.nonce_param).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_id() {
        let classifier = QueryParamClassifier::default();
        assert_eq!(
            classifier.item_id("http://test.com/?item=itemX"),
            Some("itemX".to_string())
        );
        assert_eq!(classifier.item_id("http://test.com/"), None);
        assert_eq!(classifier.item_id("http://test.com/?other=1"), None);
        assert_eq!(classifier.item_id("http://test.com/?item="), None);
    }

    #[test]
    fn test_item_id_is_decoded() {
        let classifier = QueryParamClassifier::default();
        assert_eq!(
            classifier.item_id("http://test.com/?item=MacBook%20Air"),
            Some("MacBook Air".to_string())
        );
        assert_eq!(
            classifier.item_id("http://test.com/?page=2&item=MacBook+Pro#reviews"),
            Some("MacBook Pro".to_string())
        );
        // Already-decoded spaces pass through unchanged
        assert_eq!(
            classifier.item_id("http://test.com/?item=MacBook Air"),
            Some("MacBook Air".to_string())
        );
    }

    #[test]
    fn test_is_dynamic() {
        let classifier = QueryParamClassifier::default();
        assert!(classifier.is_dynamic("http://test.com/?item=itemX&_=1234536"));
        assert!(!classifier.is_dynamic("http://test.com/?item=itemX"));
        assert!(!classifier.is_dynamic("http://test.com/?item=itemX&_="));
    }

    #[test]
    fn test_custom_params() {
        let classifier = QueryParamClassifier::new("sku", "nonce");
        assert_eq!(
            classifier.item_id("http://test.com/p?sku=42"),
            Some("42".to_string())
        );
        assert!(classifier.is_dynamic("http://test.com/p?sku=42&nonce=x"));
    }
}
