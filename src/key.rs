//! Store keys and their cache key encoding

use std::fmt::{self, Write as _};

/// Identity part of a [`Key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyId {
    /// No identity yet; the primary store assigns one on write.
    Incomplete,
    Int(i64),
    Name(String),
}

/// Handle to a record in the primary store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    namespace: String,
    kind: String,
    id: KeyId,
    parent: Option<Box<Key>>,
}

impl Key {
    /// Key whose identity will be assigned by the store.
    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self::with_id(kind, KeyId::Incomplete)
    }

    pub fn int(kind: impl Into<String>, id: i64) -> Self {
        Self::with_id(kind, KeyId::Int(id))
    }

    pub fn name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_id(kind, KeyId::Name(name.into()))
    }

    pub fn with_id(kind: impl Into<String>, id: KeyId) -> Self {
        Self {
            namespace: String::new(),
            kind: kind.into(),
            id,
            parent: None,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_parent(mut self, parent: Key) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &KeyId {
        &self.id
    }

    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    /// True when the store has not assigned an identity yet.
    pub fn is_incomplete(&self) -> bool {
        self.id == KeyId::Incomplete
    }

    /// Copy of this key carrying the given identity, used by stores that
    /// resolve incomplete keys.
    pub fn resolved(&self, id: KeyId) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }

    /// Ancestor path from the root down to this key.
    fn path(&self) -> Vec<&Key> {
        let mut path = vec![self];
        let mut current = self;
        while let Some(parent) = current.parent() {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        path
    }
}

/// Write `field` with every delimiter used by the key encoding
/// percent-escaped, so encoded keys can always be split back apart.
fn write_escaped(f: &mut impl fmt::Write, field: &str) -> fmt::Result {
    for c in field.chars() {
        match c {
            '%' | '\'' | '/' | ',' | '|' => write!(f, "%{:02X}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    Ok(())
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.path().into_iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write_escaped(f, &segment.kind)?;
            match &segment.id {
                KeyId::Incomplete => f.write_str(",?")?,
                KeyId::Int(id) => write!(f, ",{}", id)?,
                KeyId::Name(name) => {
                    f.write_str(",'")?;
                    write_escaped(f, name)?;
                    f.write_str("'")?;
                }
            }
        }
        Ok(())
    }
}

/// Trait for deriving cache keys from store keys.
///
/// The read path must use the same formatter to recognize lock entries.
pub trait LockKeyFormatter: Send + Sync + 'static {
    /// Build the cache key for a store key
    fn format_key(&self, key: &Key) -> String;
}

/// Formats keys as `{prefix}{namespace}|{path}`.
///
/// Namespace, kinds and names are percent-escaped, so distinct keys never
/// share a cache key.
#[derive(Debug, Clone)]
pub struct PrefixKeyFormatter {
    prefix: String,
}

impl PrefixKeyFormatter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl LockKeyFormatter for PrefixKeyFormatter {
    fn format_key(&self, key: &Key) -> String {
        let mut out = self.prefix.clone();
        // Writing into a String cannot fail
        let _ = write_escaped(&mut out, key.namespace());
        let _ = write!(out, "|{}", key);
        out
    }
}
