//! Populating base collections from an external source.
//!
//! The engine does no I/O itself. A [`Fetch`] implementation retrieves the
//! raw payload for a named endpoint; a [`Resource`] decodes it and resets
//! its collection in one step.
//!
//! # Payload
//!
//! A JSON object keyed by identity. Each value is the attribute map of one
//! record; the key is written into the collection's identity attribute:
//!
//! ```json
//! {
//!   "urn:place:1": { "label": "City Hall", "type": "building" },
//!   "urn:place:2": { "label": "Riverside Path", "type": "landscape" }
//! }
//! ```
//!
//! On any failure the collection is left exactly as it was and the error is
//! returned. There is no retry.

use std::error::Error as StdError;

use tracing::{debug, warn};

use crate::collection::Collection;
use crate::error::{Error, Result};
use crate::record::{Attributes, Value};

/// Error type fetchers report; only its message is kept.
pub type FetchError = Box<dyn StdError + Send + Sync>;

/// Retrieves raw payloads by endpoint name.
#[allow(async_fn_in_trait)]
pub trait Fetch {
    /// Fetch the payload published at `endpoint`.
    async fn fetch(&self, endpoint: &str) -> std::result::Result<String, FetchError>;
}

impl<T: Fetch + ?Sized> Fetch for &T {
    async fn fetch(&self, endpoint: &str) -> std::result::Result<String, FetchError> {
        (**self).fetch(endpoint).await
    }
}

/// Decode a keyed payload into attribute maps, writing each key into
/// `id_attribute`.
pub fn decode_payload(payload: &str, id_attribute: &str) -> Result<Vec<Attributes>> {
    let keyed: serde_json::Map<String, serde_json::Value> = serde_json::from_str(payload)?;

    keyed
        .into_iter()
        .map(|(key, entry)| -> Result<Attributes> {
            let mut attributes: Attributes = serde_json::from_value(entry)?;
            attributes.insert(id_attribute.to_string(), Value::Text(key));
            Ok(attributes)
        })
        .collect()
}

/// A base collection bound to the endpoint that fills it.
#[derive(Debug)]
pub struct Resource<F> {
    collection: Collection,
    endpoint: String,
    fetcher: F,
}

impl<F: Fetch> Resource<F> {
    /// Bind `collection` to `endpoint`, fetched through `fetcher`.
    pub fn new(collection: &Collection, endpoint: impl Into<String>, fetcher: F) -> Self {
        Self {
            collection: collection.clone(),
            endpoint: endpoint.into(),
            fetcher,
        }
    }

    /// The collection being filled.
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// The endpoint name.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch, decode and reset. Returns the new member count.
    pub async fn load(&self) -> Result<usize> {
        debug!(endpoint = %self.endpoint, collection = self.collection.name(), "fetching");

        let payload = self.fetcher.fetch(&self.endpoint).await.map_err(|err| {
            warn!(endpoint = %self.endpoint, error = %err, "fetch failed");
            Error::Fetch {
                endpoint: self.endpoint.clone(),
                reason: err.to_string(),
            }
        })?;

        let records = decode_payload(&payload, self.collection.id_attribute()).inspect_err(|err| {
            warn!(endpoint = %self.endpoint, error = %err, "rejected payload");
        })?;

        self.collection.reset(records)?;
        debug!(
            endpoint = %self.endpoint,
            members = self.collection.len(),
            "collection loaded"
        );
        Ok(self.collection.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{CollectionEvent, CollectionOptions};
    use crate::attrs;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    #[derive(Default)]
    struct Canned {
        responses: HashMap<String, std::result::Result<String, String>>,
        calls: RefCell<Vec<String>>,
    }

    impl Canned {
        fn with(mut self, endpoint: &str, response: std::result::Result<&str, &str>) -> Self {
            self.responses.insert(
                endpoint.to_string(),
                response.map(str::to_string).map_err(str::to_string),
            );
            self
        }
    }

    impl Fetch for Canned {
        async fn fetch(&self, endpoint: &str) -> std::result::Result<String, FetchError> {
            self.calls.borrow_mut().push(endpoint.to_string());
            match self.responses.get(endpoint) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(reason)) => Err(reason.clone().into()),
                None => Err(format!("no route to {endpoint}").into()),
            }
        }
    }

    const PLACES: &str = r#"{
        "urn:place:1": { "label": "City Hall", "type": "building" },
        "urn:place:2": { "label": "Riverside Path", "type": "landscape", "tags": ["river", "walk"] }
    }"#;

    #[test]
    fn payload_keys_become_identities() {
        let rows = decode_payload(PLACES, "uri").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("uri"), Some(&Value::from("urn:place:1")));
        assert_eq!(rows[1].get("tags"), Some(&Value::from(vec!["river", "walk"])));
    }

    #[tokio::test]
    async fn load_resets_once() {
        let places = Collection::new(CollectionOptions::named("places").id_attribute("uri"));
        places.add(attrs! { "uri" => "urn:stale", "label" => "gone" }).unwrap();

        let resets = Rc::new(RefCell::new(Vec::new()));
        let r = resets.clone();
        places.on_any(move |event| {
            if let CollectionEvent::Reset { records } = event {
                r.borrow_mut().push(records.len());
            } else {
                r.borrow_mut().push(usize::MAX);
            }
        });

        let resource = Resource::new(&places, "places", Canned::default().with("places", Ok(PLACES)));
        assert_eq!(resource.load().await.unwrap(), 2);

        assert_eq!(*resets.borrow(), vec![2]);
        assert!(!places.contains("urn:stale"));
        assert_eq!(
            places.get("urn:place:1").unwrap().text("label").as_deref(),
            Some("City Hall")
        );
    }

    #[tokio::test]
    async fn failures_leave_the_collection_untouched() {
        let places = Collection::named("places");
        places.add(attrs! { "id" => "keep" }).unwrap();

        let fetcher = Canned::default()
            .with("down", Err("503 service unavailable"))
            .with("garbled", Ok("{ not json"))
            .with("wrong-shape", Ok(r#"{ "a": 42 }"#));

        let down = Resource::new(&places, "down", fetcher);
        let err = down.load().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Fetch { ref endpoint, ref reason }
                if endpoint == "down" && reason.contains("503")
        ));

        let fetcher = down.fetcher;
        for endpoint in ["garbled", "wrong-shape"] {
            let resource = Resource::new(&places, endpoint, &fetcher);
            assert!(matches!(resource.load().await, Err(Error::Payload(_))));
        }

        assert_eq!(places.ids().len(), 1);
        assert!(places.contains("keep"));
        assert_eq!(fetcher.calls.borrow().len(), 3);
    }
}
