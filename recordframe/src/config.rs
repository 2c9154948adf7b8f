//! This module contains per-record binding configurations.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::Result;
use crate::{Error, ErrorKind};

const SET_INDEX_KEY: &str = "recordframe.set_index";
const NULLABLE_INTS_AS_FLOATS_KEY: &str = "recordframe.store_nullable_ints_as_floats";
const DATES_AS_TIMESTAMPS_KEY: &str = "recordframe.store_dates_as_timestamps";
const ENUM_MEMBERS_AS_KEY: &str = "recordframe.store_enum_members_as";

/// Binding configuration of a record type.
#[derive(PartialEq, Eq, Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BindConfig {
    /// How index fields are placed into the table's index levels.
    pub set_index: SetIndex,
    /// Store nullable integer fields as `Float64` instead of nullable integer storage.
    pub store_nullable_ints_as_floats: bool,
    /// Store date fields as naive microsecond timestamps.
    pub store_dates_as_timestamps: bool,
    /// How enumeration members are stored.
    pub store_enum_members_as: EnumStorage,
}

/// Placement mode of index fields.
///
/// If a record declares index fields:
///
/// - `True`: require that such fields are in the columns. They will be moved
///   to the index levels.
/// - `False`: require that such fields are already the index levels.
/// - `Auto`: move such fields to the index levels if they are all in the
///   columns, otherwise trust the table's index as-is.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default, Deserialize)]
#[serde(try_from = "SetIndexRepr")]
pub enum SetIndex {
    /// Index fields must already be the index levels.
    #[default]
    False,
    /// Index fields must be columns and are moved into the index.
    True,
    /// Behaves as `True` when all index fields are columns, `False` otherwise.
    Auto,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SetIndexRepr {
    Flag(bool),
    Mode(String),
}

impl TryFrom<SetIndexRepr> for SetIndex {
    type Error = Error;

    fn try_from(value: SetIndexRepr) -> Result<Self> {
        match value {
            SetIndexRepr::Flag(true) => Ok(SetIndex::True),
            SetIndexRepr::Flag(false) => Ok(SetIndex::False),
            SetIndexRepr::Mode(mode) => mode.parse(),
        }
    }
}

impl From<bool> for SetIndex {
    fn from(value: bool) -> Self {
        if value {
            SetIndex::True
        } else {
            SetIndex::False
        }
    }
}

impl FromStr for SetIndex {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "true" => Ok(SetIndex::True),
            "false" => Ok(SetIndex::False),
            "auto" => Ok(SetIndex::Auto),
            s => Err(Error::new(
                ErrorKind::ConfigInvalid,
                format!("Invalid set_index mode {s}, expected true, false or auto"),
            )),
        }
    }
}

impl Display for SetIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SetIndex::True => write!(f, "true"),
            SetIndex::False => write!(f, "false"),
            SetIndex::Auto => write!(f, "auto"),
        }
    }
}

/// Storage representation of enumeration members.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumStorage {
    /// Store the member name as `Utf8`.
    #[default]
    Names,
    /// Store the member position as `Int32`.
    Ordinals,
}

impl FromStr for EnumStorage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "names" => Ok(EnumStorage::Names),
            "ordinals" => Ok(EnumStorage::Ordinals),
            s => Err(Error::new(
                ErrorKind::ConfigInvalid,
                format!("Invalid enum storage {s}, expected names or ordinals"),
            )),
        }
    }
}

impl BindConfig {
    /// Parse a config from a toml document.
    ///
    /// Missing keys keep their default value.
    pub fn from_toml(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Set the index placement mode.
    pub fn with_set_index(mut self, set_index: impl Into<SetIndex>) -> Self {
        self.set_index = set_index.into();
        self
    }
}

impl TryFrom<&'_ HashMap<String, String>> for BindConfig {
    type Error = Error;

    fn try_from(value: &'_ HashMap<String, String>) -> Result<Self> {
        let mut config = BindConfig::default();

        value
            .get(SET_INDEX_KEY)
            .map(|v| v.parse::<SetIndex>())
            .transpose()?
            .iter()
            .for_each(|v| config.set_index = *v);

        value
            .get(NULLABLE_INTS_AS_FLOATS_KEY)
            .map(|v| v.parse::<bool>())
            .transpose()
            .map_err(|e| {
                Error::new(
                    ErrorKind::ConfigInvalid,
                    format!("Can't parse {NULLABLE_INTS_AS_FLOATS_KEY}."),
                )
                .set_source(e)
            })?
            .iter()
            .for_each(|v| config.store_nullable_ints_as_floats = *v);

        value
            .get(DATES_AS_TIMESTAMPS_KEY)
            .map(|v| v.parse::<bool>())
            .transpose()
            .map_err(|e| {
                Error::new(
                    ErrorKind::ConfigInvalid,
                    format!("Can't parse {DATES_AS_TIMESTAMPS_KEY}."),
                )
                .set_source(e)
            })?
            .iter()
            .for_each(|v| config.store_dates_as_timestamps = *v);

        value
            .get(ENUM_MEMBERS_AS_KEY)
            .map(|v| v.parse::<EnumStorage>())
            .transpose()?
            .iter()
            .for_each(|v| config.store_enum_members_as = *v);

        Ok(config)
    }
}
