//! Layered configuration lookup
//!
//! A property value is taken from the first non-empty source, in this order:
//!
//! 1. system property `<prefix>.<key>`
//! 2. environment variable `<prefix>.<key>`
//! 3. environment variable `<PREFIX>_<KEY>` (uppercased, `.` and `-` replaced by `_`)
//! 4. the caller-supplied property map, keyed by `<key>` alone
//! 5. the declared default

use crate::error::{DiscoveryError, Result};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

/// Prefix for process-level overrides of the Kubernetes discovery properties
pub const KUBERNETES_SYSTEM_PREFIX: &str = "kubegrid.kubernetes";

/// Master URL used when `kubernetes-master` is not configured
pub const DEFAULT_KUBERNETES_MASTER: &str = "https://kubernetes.default.svc";

pub const SERVICE_DNS: PropertyDefinition<String> = PropertyDefinition::new("service-dns");
pub const SERVICE_NAME: PropertyDefinition<String> = PropertyDefinition::new("service-name");
pub const NAMESPACE: PropertyDefinition<String> = PropertyDefinition::new("namespace");
pub const KUBERNETES_MASTER_URL: PropertyDefinition<String> =
    PropertyDefinition::new("kubernetes-master");

/// Every property key the Kubernetes discovery strategy recognises
pub const CONFIGURATION_PROPERTIES: [&str; 4] = [
    SERVICE_DNS.key(),
    SERVICE_NAME.key(),
    NAMESPACE.key(),
    KUBERNETES_MASTER_URL.key(),
];

/// Caller-supplied property bag
pub type PropertyMap = HashMap<String, String>;

/// A named, typed configuration slot
pub struct PropertyDefinition<T> {
    key: &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> PropertyDefinition<T> {
    pub const fn new(key: &'static str) -> Self {
        Self {
            key,
            _type: PhantomData,
        }
    }

    pub const fn key(&self) -> &'static str {
        self.key
    }
}

impl<T> PropertyDefinition<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    /// Convert a raw string through the property's type
    pub fn convert(&self, source_key: &str, raw: &str) -> Result<T> {
        raw.parse().map_err(|e: T::Err| DiscoveryError::InvalidProperty {
            key: source_key.to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
    }
}

impl<T> fmt::Debug for PropertyDefinition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDefinition")
            .field("key", &self.key)
            .finish()
    }
}

/// A flat key/value store consulted during property lookup
pub trait PropertySource: Send + Sync {
    fn lookup(&self, key: &str) -> Option<String>;
}

/// In-process overrides, the analogue of JVM system properties
#[derive(Clone, Debug, Default)]
pub struct SystemProperties {
    values: HashMap<String, String>,
}

impl SystemProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Parse a `key=value` pair, as given on the command line
    pub fn set_from_pair(&mut self, pair: &str) -> Result<()> {
        let (key, value) = split_pair(pair)?;
        self.set(key, value);
        Ok(())
    }
}

impl PropertySource for SystemProperties {
    fn lookup(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// The process environment
#[derive(Clone, Copy, Debug, Default)]
pub struct Environment;

impl PropertySource for Environment {
    fn lookup(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// A fixed map, used to inject an environment
#[derive(Clone, Debug, Default)]
pub struct MapSource(pub HashMap<String, String>);

impl PropertySource for MapSource {
    fn lookup(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

impl<const N: usize> From<[(&str, &str); N]> for MapSource {
    fn from(entries: [(&str, &str); N]) -> Self {
        Self(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// Resolves property values across override sources, the property map and defaults
#[derive(Clone)]
pub struct PropertyResolver {
    system: Arc<dyn PropertySource>,
    environment: Arc<dyn PropertySource>,
}

impl PropertyResolver {
    pub fn new(
        system: impl PropertySource + 'static,
        environment: impl PropertySource + 'static,
    ) -> Self {
        Self {
            system: Arc::new(system),
            environment: Arc::new(environment),
        }
    }

    /// Resolver backed by the given system properties and the real environment
    pub fn from_process(system: SystemProperties) -> Self {
        Self::new(system, Environment)
    }

    /// Look up a property without a default
    pub fn get_or_none<T>(
        &self,
        properties: &PropertyMap,
        prefix: Option<&str>,
        definition: Option<&PropertyDefinition<T>>,
    ) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.resolve(properties, prefix, definition, None)
    }

    /// Look up a property, falling back to `default`
    pub fn get_or_default<T>(
        &self,
        properties: &PropertyMap,
        prefix: Option<&str>,
        definition: Option<&PropertyDefinition<T>>,
        default: T,
    ) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match definition {
            Some(definition) => Ok(self.find(properties, prefix, definition)?.unwrap_or(default)),
            None => Ok(default),
        }
    }

    /// Resolve a property through every source in precedence order.
    ///
    /// A missing definition short-circuits to `default` without consulting any source.
    pub fn resolve<T>(
        &self,
        properties: &PropertyMap,
        prefix: Option<&str>,
        definition: Option<&PropertyDefinition<T>>,
        default: Option<T>,
    ) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match definition {
            Some(definition) => Ok(self.find(properties, prefix, definition)?.or(default)),
            None => Ok(default),
        }
    }

    fn find<T>(
        &self,
        properties: &PropertyMap,
        prefix: Option<&str>,
        definition: &PropertyDefinition<T>,
    ) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        if let Some(prefix) = prefix {
            if let Some((source_key, raw)) = self.read_override(prefix, definition.key()) {
                return definition.convert(&source_key, &raw).map(Some);
            }
        }

        properties
            .get(definition.key())
            .filter(|v| !v.is_empty())
            .map(|raw| definition.convert(definition.key(), raw))
            .transpose()
    }

    fn read_override(&self, prefix: &str, key: &str) -> Option<(String, String)> {
        let name = override_key(prefix, key);
        let env_name = c_identifier_like(&name);

        let lookups: [(&dyn PropertySource, &str); 3] = [
            (self.system.as_ref(), name.as_str()),
            (self.environment.as_ref(), name.as_str()),
            (self.environment.as_ref(), env_name.as_str()),
        ];

        let found = lookups.iter().find_map(|&(source, lookup_key)| {
            source
                .lookup(lookup_key)
                .filter(|v| !v.is_empty())
                .map(|v| (lookup_key.to_string(), v))
        });
        found
    }
}

impl fmt::Debug for PropertyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyResolver").finish_non_exhaustive()
    }
}

impl Default for PropertyResolver {
    fn default() -> Self {
        Self::from_process(SystemProperties::new())
    }
}

/// `<prefix>.<key>`, without doubling a trailing dot on the prefix
pub fn override_key(prefix: &str, key: &str) -> String {
    if prefix.ends_with('.') {
        format!("{}{}", prefix, key)
    } else {
        format!("{}.{}", prefix, key)
    }
}

/// Environment-variable form of a property name
pub fn c_identifier_like(name: &str) -> String {
    name.to_uppercase().replace(['.', '-'], "_")
}

/// Split `key=value`; the value may itself contain `=`
pub fn split_pair(pair: &str) -> Result<(&str, &str)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => Err(DiscoveryError::Configuration(format!(
            "expected key=value, got '{}'",
            pair
        ))),
    }
}
