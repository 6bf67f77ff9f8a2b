
pub mod error;
pub mod experiment;
pub mod id;
pub mod run;
pub mod store;

// MLflow encodes int64 fields either as JSON numbers or as decimal strings,
// depending on the server version. Accept both, always write numbers.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum IntOrStr {
    Int(i64),
    Str(String),
}

impl IntOrStr {
    fn into_i64<E: serde::de::Error>(self) -> Result<i64, E> {
        match self {
            IntOrStr::Int(int) => Ok(int),
            IntOrStr::Str(s) => s.parse().map_err(E::custom),
        }
    }
}

// deserialize i64 from number or str
mod str_int {
    use serde::de::{Deserialize, Deserializer};
    use serde::ser::Serializer;

    use super::IntOrStr;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>
    {
        IntOrStr::deserialize(deserializer)?.into_i64()
    }

    pub fn serialize<S>(int: &i64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(*int)
    }
}
// deserialize Option<i64> from Option<number or str>
mod opt_str_int {
    use serde::de::{Deserialize, Deserializer};
    use serde::ser::{Serialize, Serializer};

    use super::IntOrStr;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>
    {
        match Option::<IntOrStr>::deserialize(deserializer)? {
            Some(value) => Ok(Some(value.into_i64()?)),
            None => Ok(None),
        }
    }

    pub fn serialize<S>(int: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        int.serialize(serializer)
    }
}
