//! Deserialize a room id sent as either a JSON string or a JSON number into a `String`.
//! Clients send post and event ids both ways; `7` and `"7"` must name the same room.

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Int(i64),
    Float(f64),
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::Str(s) => s.trim().to_string(),
        StringOrNumber::Int(n) => n.to_string(),
        StringOrNumber::Float(f) => f.to_string(),
    })
}

pub mod opt {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wrapper(#[serde(deserialize_with = "super::deserialize")] String);

        let v = Option::<Wrapper>::deserialize(deserializer)?;
        Ok(v.map(|Wrapper(s)| s).filter(|s| !s.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Req {
        #[serde(deserialize_with = "super::deserialize")]
        id: String,
        #[serde(default, deserialize_with = "super::opt::deserialize")]
        other: Option<String>,
    }

    #[test]
    fn numbers_and_strings_name_the_same_id() {
        let a: Req = serde_json::from_str(r#"{"id": 7}"#).unwrap();
        let b: Req = serde_json::from_str(r#"{"id": " 7 "}"#).unwrap();
        assert_eq!(a.id, "7");
        assert_eq!(a.id, b.id);
        assert!(a.other.is_none());
    }

    #[test]
    fn optional_id_treats_null_and_blank_as_absent() {
        let a: Req = serde_json::from_str(r#"{"id": 1, "other": null}"#).unwrap();
        let b: Req = serde_json::from_str(r#"{"id": 1, "other": ""}"#).unwrap();
        let c: Req = serde_json::from_str(r#"{"id": 1, "other": "e5"}"#).unwrap();
        assert!(a.other.is_none());
        assert!(b.other.is_none());
        assert_eq!(c.other.as_deref(), Some("e5"));
    }
}
