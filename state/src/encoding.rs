//! Canonical key derivation for cached identities.
//!
//! An identity is first rendered as compact JSON (object members in sorted
//! order, so structurally equal identities always render identically) and the
//! text is then transformed according to the store's [`Encoding`].

use crate::error::{Result, StateError};

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::Sha1;

/// The sentinel identity used by stores in single-entity mode.
pub const SINGLE_ENTITY_SENTINEL: &str = "single-entity";

/// Selects how the JSON text of an identity is turned into the final key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
  /// The JSON text is used as-is.
  #[default]
  Plain,
  /// Standard, padded base64 of the JSON text.
  Base64,
  /// Lowercase hex MD5 digest of the JSON text.
  Md5,
  /// Lowercase hex SHA-1 digest of the JSON text.
  Sha1,
}

impl Encoding {
  fn transform(self, text: String) -> String {
    match self {
      Encoding::Plain => text,
      Encoding::Base64 => STANDARD.encode(text.as_bytes()),
      Encoding::Md5 => hex::encode(Md5::digest(text.as_bytes())),
      Encoding::Sha1 => hex::encode(Sha1::digest(text.as_bytes())),
    }
  }
}

impl fmt::Display for Encoding {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Encoding::Plain => "plain",
      Encoding::Base64 => "base64",
      Encoding::Md5 => "md5",
      Encoding::Sha1 => "sha1",
    };
    f.write_str(name)
  }
}

impl FromStr for Encoding {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "plain" => Ok(Encoding::Plain),
      "base64" => Ok(Encoding::Base64),
      "md5" => Ok(Encoding::Md5),
      "sha1" => Ok(Encoding::Sha1),
      other => Err(format!("unknown key encoding '{}'", other)),
    }
  }
}

/// The encoded key of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryKey(String);

impl EntryKey {
  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn into_string(self) -> String {
    self.0
  }
}

impl AsRef<str> for EntryKey {
  fn as_ref(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for EntryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Turns identities into [`EntryKey`]s for one store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyEncoder {
  encoding: Encoding,
  single_entity_mode: bool,
}

impl KeyEncoder {
  pub fn new(encoding: Encoding, single_entity_mode: bool) -> Self {
    Self {
      encoding,
      single_entity_mode,
    }
  }

  pub fn encoding(&self) -> Encoding {
    self.encoding
  }

  pub fn single_entity_mode(&self) -> bool {
    self.single_entity_mode
  }

  /// Encodes a typed identity.
  ///
  /// In single-entity mode the identity is ignored and the fixed sentinel is
  /// encoded instead. Otherwise a missing identity, or one that serializes to
  /// JSON `null`, fails with [`StateError::MissingIdentity`].
  pub fn encode<Id>(&self, identity: Option<&Id>) -> Result<EntryKey>
  where
    Id: Serialize + ?Sized,
  {
    if self.single_entity_mode {
      return self.encode_value(None);
    }
    let identity = identity.ok_or(StateError::MissingIdentity)?;
    let value =
      serde_json::to_value(identity).map_err(|e| StateError::EncodingFailure(e.to_string()))?;
    self.encode_value(Some(&value))
  }

  /// Encodes an identity that is already in JSON form, e.g. one read back
  /// from a stored item's id property.
  pub(crate) fn encode_value(&self, identity: Option<&Value>) -> Result<EntryKey> {
    let rendered = match identity {
      _ if self.single_entity_mode => serde_json::to_string(SINGLE_ENTITY_SENTINEL),
      None | Some(Value::Null) => return Err(StateError::MissingIdentity),
      Some(value) => serde_json::to_string(&canonical(value)),
    };
    let text = rendered.map_err(|e| StateError::EncodingFailure(e.to_string()))?;

    if text.is_empty() {
      return Err(StateError::EncodingFailure(
        "identity rendered to empty text".to_string(),
      ));
    }

    Ok(EntryKey(self.encoding.transform(text)))
  }
}

/// Rebuilds `value` with object members in key order, whichever map
/// `serde_json` was compiled with.
fn canonical(value: &Value) -> Value {
  match value {
    Value::Object(members) => {
      let mut sorted: Vec<_> = members.iter().collect();
      sorted.sort_by(|(a, _), (b, _)| a.cmp(b));
      Value::Object(
        sorted
          .into_iter()
          .map(|(name, member)| (name.clone(), canonical(member)))
          .collect(),
      )
    }
    Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
    other => other.clone(),
  }
}
