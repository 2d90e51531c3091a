//! Deserialization of name-keyed maps that rejects duplicate names.
//!
//! `IndexMap`'s own `Deserialize` keeps the last of two equal keys, which would
//! silently drop a definition. Entries also learn their own name here so the
//! model never has to be patched up after loading.

use std::fmt;
use std::marker::PhantomData;

use indexmap::IndexMap;
use serde::de::{Deserialize, Deserializer, Error, MapAccess, Visitor};

/// A map entry that carries its key.
pub(crate) trait Named {
    fn set_name(&mut self, name: &str);
}

pub(crate) fn deserialize<'de, D, T>(deserializer: D) -> Result<IndexMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Named,
{
    struct UniqueVisitor<T>(PhantomData<T>);

    impl<'de, T> Visitor<'de> for UniqueVisitor<T>
    where
        T: Deserialize<'de> + Named,
    {
        type Value = IndexMap<String, T>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of uniquely named entries")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = IndexMap::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((name, mut value)) = access.next_entry::<String, T>()? {
                if entries.contains_key(&name) {
                    return Err(A::Error::custom(format!("duplicate entry '{}'", name)));
                }
                value.set_name(&name);
                entries.insert(name, value);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(UniqueVisitor(PhantomData))
}
