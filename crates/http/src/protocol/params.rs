//! Query string and urlencoded form decoding.

use std::borrow::Cow;
use std::collections::HashMap;
use std::collections::hash_map;

use serde::de::value::{Error as ValueError, MapDeserializer};
use serde::de::{self, DeserializeOwned, Deserializer, IntoDeserializer, Visitor};
use serde::forward_to_deserialize_any;

/// Decodes `%XX` escapes and `+` as a space, as used in query strings and
/// `application/x-www-form-urlencoded` bodies.
///
/// The decoded bytes are read as UTF-8, invalid sequences are replaced with
/// `U+FFFD`. Returns `None` for a truncated or non-hex escape.
pub fn decode_percent(s: &str) -> Option<Cow<'_, str>> {
    decode(s, true)
}

/// Like [`decode_percent`] but keeps `+` as is, which is what a URI path needs.
pub fn decode_path(s: &str) -> Option<Cow<'_, str>> {
    decode(s, false)
}

fn decode(s: &str, plus_as_space: bool) -> Option<Cow<'_, str>> {
    if !s.bytes().any(|b| b == b'%' || (plus_as_space && b == b'+')) {
        return Some(Cow::Borrowed(s));
    }

    let mut decoded = Vec::with_capacity(s.len());
    let mut bytes = s.bytes();
    while let Some(byte) = bytes.next() {
        match byte {
            b'%' => {
                let hi = hex_value(bytes.next()?)?;
                let lo = hex_value(bytes.next()?)?;
                decoded.push(hi << 4 | lo);
            }
            b'+' if plus_as_space => decoded.push(b' '),
            b => decoded.push(b),
        }
    }

    Some(Cow::Owned(String::from_utf8_lossy(&decoded).into_owned()))
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decoded name/value pairs where a name may repeat.
///
/// Values of a repeated name are kept in the order they were encountered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    inner: HashMap<String, Vec<String>>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `a=1&b=2&a=3`.
    ///
    /// Empty segments are skipped, names are trimmed, and a name without `=`
    /// is recorded with no values. Segments with a broken escape are kept
    /// undecoded rather than dropped.
    pub fn parse(query: &str) -> Self {
        let mut params = Self::new();
        for segment in query.split('&').filter(|segment| !segment.is_empty()) {
            let (name, value) = match segment.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (segment, None),
            };

            let name = decode_percent(name).unwrap_or(Cow::Borrowed(name));
            let values = params.inner.entry(name.trim().to_owned()).or_default();
            if let Some(value) = value {
                values.push(decode_percent(value).unwrap_or(Cow::Borrowed(value)).into_owned());
            }
        }
        params
    }

    /// Appends `value` to the values of `name`.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.entry(name.into()).or_default().push(value.into());
    }

    /// The first value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(name).and_then(|values| values.first()).map(String::as_str)
    }

    /// All values of `name`, empty when the name is absent or had no `=`.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.inner.get(name).map_or(&[], Vec::as_slice)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, Vec<String>> {
        self.inner.iter()
    }

    /// Deserializes the pairs into `T`, reading each value the way
    /// `serde_urlencoded` reads a form field.
    ///
    /// # Errors
    ///
    /// Fails when the pairs do not match the shape of `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, ValueError> {
        let pairs = self
            .inner
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |value| (name.as_str(), FieldValue(value))));
        T::deserialize(MapDeserializer::new(pairs))
    }
}

/// One decoded value. Scalars are parsed from the text, everything else sees a string.
struct FieldValue<'a>(&'a str);

impl<'de> IntoDeserializer<'de, ValueError> for FieldValue<'_> {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

macro_rules! deserialize_parsed {
    ($($method:ident => $visit:ident,)+) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
                match self.0.parse() {
                    Ok(value) => visitor.$visit(value),
                    Err(e) => Err(de::Error::custom(format_args!("invalid value {:?}: {e}", self.0))),
                }
            }
        )+
    };
}

impl<'de> Deserializer<'de> for FieldValue<'_> {
    type Error = ValueError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_str(self.0)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V>(self, _name: &'static str, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        IntoDeserializer::<'de, ValueError>::into_deserializer(self.0).deserialize_enum(name, variants, visitor)
    }

    deserialize_parsed! {
        deserialize_bool => visit_bool,
        deserialize_i8 => visit_i8,
        deserialize_i16 => visit_i16,
        deserialize_i32 => visit_i32,
        deserialize_i64 => visit_i64,
        deserialize_u8 => visit_u8,
        deserialize_u16 => visit_u16,
        deserialize_u32 => visit_u32,
        deserialize_u64 => visit_u64,
        deserialize_f32 => visit_f32,
        deserialize_f64 => visit_f64,
    }

    forward_to_deserialize_any! {
        char str string bytes byte_buf unit unit_struct seq tuple tuple_struct map struct identifier ignored_any
    }
}

impl<'a> IntoIterator for &'a Parameters {
    type Item = (&'a String, &'a Vec<String>);
    type IntoIter = hash_map::Iter<'a, String, Vec<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
