//! Property and profile view consulted by conditions and factories

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::de::value::{Error as BindError, MapDeserializer};
use serde::de::{self, DeserializeOwned, IntoDeserializer, Unexpected, Visitor};
use serde::forward_to_deserialize_any;
use std::str::FromStr;

/// String properties plus active profiles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    properties: IndexMap<String, String>,
    profiles: Vec<String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_properties<I, K, V>(properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            profiles: Vec::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_property(key, value);
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.activate_profile(profile);
        self
    }

    /// Later values replace earlier ones
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn activate_profile(&mut self, profile: impl Into<String>) {
        let profile = profile.into();
        if !self.profiles.contains(&profile) {
            self.profiles.push(profile);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// `true/false`, `yes/no`, `on/off`, `1/0`, case-insensitive; anything else is `None`
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(parse_bool)
    }

    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    pub fn is_profile_active(&self, profile: &str) -> bool {
        self.profiles.iter().any(|p| p == profile)
    }

    pub fn active_profiles(&self) -> &[String] {
        &self.profiles
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Bind every `prefix.*` property into `T`
    ///
    /// Keys are taken relative to the prefix with `-` mapped to `_`. Each value
    /// is read as the type of the field it lands in: strings stay verbatim,
    /// booleans use the same spellings as [`Environment::get_bool`] and numbers
    /// are parsed. Fields missing from the environment fall back to `T`'s serde
    /// defaults.
    pub fn bind<T: DeserializeOwned>(&self, prefix: &str) -> Result<T> {
        let lead = format!("{}.", prefix);
        let entries = self.properties.iter().filter_map(|(key, value)| {
            key.strip_prefix(&lead)
                .map(|field| (field.replace('-', "_"), PropertyValue(value)))
        });
        T::deserialize(MapDeserializer::<_, BindError>::new(entries))
            .with_context(|| format!("failed to bind properties under '{}'", prefix))
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// One raw property value, read as whatever type the target field asks for
struct PropertyValue<'a>(&'a str);

impl<'de> IntoDeserializer<'de, BindError> for PropertyValue<'_> {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

macro_rules! parse_number {
    ($($method:ident => $visit:ident),* $(,)?) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BindError> {
                let parsed = self
                    .0
                    .trim()
                    .parse()
                    .map_err(|_| de::Error::invalid_value(Unexpected::Str(self.0), &visitor))?;
                visitor.$visit(parsed)
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for PropertyValue<'_> {
    type Error = BindError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BindError> {
        visitor.visit_str(self.0)
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BindError> {
        match parse_bool(self.0) {
            Some(value) => visitor.visit_bool(value),
            None => Err(de::Error::invalid_value(Unexpected::Str(self.0), &visitor)),
        }
    }

    parse_number! {
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
        deserialize_char => visit_char,
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, BindError> {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, BindError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, BindError> {
        visitor.visit_enum(self.0.trim().into_deserializer())
    }

    forward_to_deserialize_any! {
        i128 u128 str string bytes byte_buf unit unit_struct seq tuple
        tuple_struct map struct identifier ignored_any
    }
}
