//! Utilities to be used in serde derives for more robust (de)serializations.

use serde::{Deserialize, Deserializer};

/// Many fields in the webauthn spec have the following wording.
///
/// > The values SHOULD be members of `T` but client platforms MUST ignore unknown values.
///
/// This method is a simple way of ignoring unknown values without failing deserialization.
pub fn ignore_unknown<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(match T::deserialize(de) {
        Ok(val) => val,
        Err(_) => T::default(),
    })
}

/// A list variant of [`ignore_unknown`] where unknown entries are dropped
/// from the resulting `Vec` instead of failing deserialization.
pub fn ignore_unknown_vec<'de, D, T>(de: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum MaybeKnown<T> {
        Known(T),
        Unknown(serde::de::IgnoredAny),
    }

    let all: Vec<MaybeKnown<T>> = Vec::deserialize(de)?;
    Ok(all
        .into_iter()
        .filter_map(|entry| match entry {
            MaybeKnown::Known(val) => Some(val),
            MaybeKnown::Unknown(_) => None,
        })
        .collect())
}

/// An optional list variant of [`ignore_unknown_vec`].
pub fn ignore_unknown_opt_vec<'de, D, T>(de: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct OptVisitor<T>(std::marker::PhantomData<T>);

    impl<'de, T: Deserialize<'de>> serde::de::Visitor<'de> for OptVisitor<T> {
        type Value = Option<Vec<T>>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("an optional list")
        }
        fn visit_none<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_some<D2>(self, de: D2) -> Result<Self::Value, D2::Error>
        where
            D2: Deserializer<'de>,
        {
            ignore_unknown_vec(de).map(Some)
        }
    }

    de.deserialize_option(OptVisitor(std::marker::PhantomData))
}

/// Some clients send numeric fields, such as timeouts, as strings. Accept both.
pub fn maybe_stringified<'de, D>(de: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberIsh {
        Int(u32),
        Text(String),
    }

    match Option::<NumberIsh>::deserialize(de)? {
        None => Ok(None),
        Some(NumberIsh::Int(num)) => Ok(Some(num)),
        Some(NumberIsh::Text(text)) => text.parse().map(Some).map_err(|_| {
            <D::Error as serde::de::Error>::invalid_value(
                serde::de::Unexpected::Str(&text),
                &"a stringified number",
            )
        }),
    }
}

pub mod i64_to_iana {
    use coset::iana::EnumI64;

    pub fn serialize<S, T>(value: &T, ser: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: EnumI64,
    {
        ser.serialize_i64(value.to_i64())
    }

    pub fn deserialize<'de, D, T>(de: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: EnumI64,
    {
        let value: i64 = super::maybe_stringified_i64(de)?;

        T::from_i64(value).ok_or_else(|| {
            <D::Error as serde::de::Error>::invalid_value(
                serde::de::Unexpected::Signed(value),
                &"an iana::Algorithm value",
            )
        })
    }
}

/// Like [`maybe_stringified`] but for required signed values such as COSE
/// algorithm identifiers, which some clients also send as strings.
fn maybe_stringified_i64<'de, D>(de: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberIsh {
        Int(i64),
        Text(String),
    }

    match NumberIsh::deserialize(de)? {
        NumberIsh::Int(num) => Ok(num),
        NumberIsh::Text(text) => text.parse().map_err(|_| {
            <D::Error as serde::de::Error>::invalid_value(
                serde::de::Unexpected::Str(&text),
                &"a stringified number",
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Deserialize)]
    #[serde(rename_all = "lowercase")]
    enum Sample {
        One,
        Two,
    }

    #[derive(Debug, Deserialize)]
    struct Holder {
        #[serde(deserialize_with = "super::ignore_unknown_vec")]
        list: Vec<Sample>,
        #[serde(default, deserialize_with = "super::maybe_stringified")]
        timeout: Option<u32>,
    }

    #[test]
    fn unknown_list_entries_are_dropped() {
        let parsed: Holder =
            serde_json::from_str(r#"{"list": ["one", "nope", "two"]}"#).expect("should parse");
        assert_eq!(parsed.list, vec![Sample::One, Sample::Two]);
        assert_eq!(parsed.timeout, None);
    }

    #[test]
    fn stringified_numbers_are_accepted() {
        let parsed: Holder =
            serde_json::from_str(r#"{"list": [], "timeout": "300000"}"#).expect("should parse");
        assert_eq!(parsed.timeout, Some(300_000));
    }
}
