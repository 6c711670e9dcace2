//! Serde helpers for storing chrono types in MongoDB's own format.

/// (De)serialise an `Option<DateTime<Utc>>` as an optional BSON datetime.
///
/// The bson crate only ships a helper for the non-optional case.
pub mod optional_datetime {
    use chrono::{DateTime, Utc};
    use mongodb::bson::DateTime as BsonDateTime;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value
            .map(BsonDateTime::from_chrono)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Ok(Option::<BsonDateTime>::deserialize(deserializer)?.map(BsonDateTime::to_chrono))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use mongodb::bson::{doc, from_document, to_document, Bson};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Stamped {
        #[serde(with = "super::optional_datetime")]
        at: Option<DateTime<Utc>>,
    }

    #[test]
    fn optional_datetimes_use_bson_datetimes() {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap();
        let stored = to_document(&Stamped { at: Some(at) }).unwrap();
        assert!(matches!(stored.get("at"), Some(Bson::DateTime(_))));
        assert_eq!(from_document::<Stamped>(stored).unwrap().at, Some(at));

        let empty = to_document(&Stamped { at: None }).unwrap();
        assert_eq!(empty, doc! { "at": Bson::Null });
        assert_eq!(from_document::<Stamped>(empty).unwrap().at, None);
    }
}
