use std::fmt;

use serde::de::{self, Visitor};
use serde::Deserializer;

/// A Visitor implementation that is able to parse either a positive integer or a
/// string holding one. Config files written by hand tend to contain both
/// `"parallel": 4` and `"parallel": "4"`.
pub fn number_or_string<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    struct NumberOrString;

    impl<'de> Visitor<'de> for NumberOrString {
        type Value = Option<usize>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("non-negative integer or numeric string")
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            usize::try_from(value)
                .map(Some)
                .map_err(|_| E::custom(format!("{} is out of range", value)))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            usize::try_from(value)
                .map(Some)
                .map_err(|_| E::custom(format!("{} is not a valid count", value)))
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(NumberOrString)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Parallel {
        #[serde(default, deserialize_with = "super::number_or_string")]
        parallel: Option<usize>,
    }

    fn parse(json: &str) -> Result<Option<usize>, serde_json::Error> {
        serde_json::from_str::<Parallel>(json).map(|p| p.parallel)
    }

    #[test]
    fn test_number() {
        assert_eq!(parse(r#"{"parallel": 8}"#).unwrap(), Some(8));
    }

    #[test]
    fn test_numeric_string() {
        assert_eq!(parse(r#"{"parallel": " 3"}"#).unwrap(), Some(3));
    }

    #[test]
    fn test_missing_and_null() {
        assert_eq!(parse("{}").unwrap(), None);
        assert_eq!(parse(r#"{"parallel": null}"#).unwrap(), None);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse(r#"{"parallel": "many"}"#).is_err());
        assert!(parse(r#"{"parallel": -2}"#).is_err());
    }
}
