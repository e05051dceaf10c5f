use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Listing identifier as issued by the listings API.
///
/// Numeric ids are kept as numbers so they sort numerically; anything else is
/// an opaque string. Numbers order before strings.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListingId {
    Num(u64),
    Str(Arc<str>),
}

impl From<u64> for ListingId {
    fn from(n: u64) -> Self {
        ListingId::Num(n)
    }
}

impl From<&str> for ListingId {
    fn from(s: &str) -> Self {
        ListingId::Str(Arc::from(s))
    }
}

impl std::fmt::Display for ListingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListingId::Num(n) => write!(f, "{n}"),
            ListingId::Str(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ListingId;

    #[test]
    fn numbers_sort_before_strings() {
        let mut ids = vec![
            ListingId::from("apt-17"),
            ListingId::Num(10),
            ListingId::Num(2),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                ListingId::Num(2),
                ListingId::Num(10),
                ListingId::from("apt-17")
            ]
        );
    }

    #[test]
    fn serializes_as_plain_value() {
        let json = serde_json::to_string(&[ListingId::Num(3), ListingId::from("b")]).unwrap();
        assert_eq!(json, r#"[3,"b"]"#);
        let back: Vec<ListingId> = serde_json::from_str(&json).unwrap();
        assert_eq!(back[1].to_string(), "b");
    }
}
