//! Per-call options and read-argument normalization.
//!
//! Callers describe reads with [`ReadArgs`], which accepts the shorthand
//! forms (`fields`, legacy `spec`, boolean `timeout`, textual
//! `return_document`, `read_use`). [`ReadArgs::normalize`] turns that into the
//! filter and [`FindOptions`] handed to the store, plus the fetch state that
//! records built from the results will carry.

use crate::error::{LayerError, Result};
use crate::fields::{fetched_for, Fetched, Projection};
use crate::types::RawDocument;
use std::str::FromStr;

/// Which version of the document a find-and-modify call returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReturnDocument {
    #[default]
    Before,
    After,
}

impl FromStr for ReturnDocument {
    type Err = LayerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "before" => Ok(ReturnDocument::Before),
            "after" => Ok(ReturnDocument::After),
            other => Err(LayerError::InvalidArgument(format!(
                "return_document must be \"before\" or \"after\", got {:?}",
                other
            ))),
        }
    }
}

/// Where reads are routed.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum ReadPreference {
    #[default]
    Primary,
    Secondary,
    Nearest,
    /// Secondary carrying the `use` tag.
    Tagged(String),
}

impl ReadPreference {
    /// Map the `read_use` shorthand.
    pub fn from_read_use(read_use: &str) -> Self {
        match read_use {
            "primary" => ReadPreference::Primary,
            "secondary" => ReadPreference::Secondary,
            "nearest" => ReadPreference::Nearest,
            tag => ReadPreference::Tagged(tag.to_string()),
        }
    }
}

/// Sort direction per field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Normalized options for a store `find`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindOptions {
    pub projection: Option<RawDocument>,
    pub sort: Vec<(String, SortOrder)>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub batch_size: Option<u32>,
    pub no_cursor_timeout: bool,
    pub read_preference: ReadPreference,
    /// Caller-supplied server time limit, passed through untouched.
    pub max_time_ms: Option<u64>,
}

impl FindOptions {
    /// Options for internal reads that must see the latest committed state.
    pub fn primary() -> Self {
        Self {
            read_preference: ReadPreference::Primary,
            ..Default::default()
        }
    }

    pub fn with_projection(mut self, projection: Option<RawDocument>) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Options for `find_one_and_*` store calls.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindAndModifyOptions {
    pub projection: Option<RawDocument>,
    pub sort: Vec<(String, SortOrder)>,
    pub upsert: bool,
    pub return_document: ReturnDocument,
    pub max_time_ms: Option<u64>,
}

/// Options for mutating collection calls.
#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    pub upsert: bool,
    pub allow_protected_fields: bool,
}

impl WriteOptions {
    pub fn upsert() -> Self {
        Self {
            upsert: true,
            ..Default::default()
        }
    }

    pub fn allow_protected() -> Self {
        Self {
            allow_protected_fields: true,
            ..Default::default()
        }
    }
}

/// Options for `Record::save`.
#[derive(Clone, Debug, Default)]
pub struct SaveOptions {
    /// Save even if the record was not built from application data.
    pub force: bool,
    /// Generate a `<collection>-<uuid>` identifier when none is set.
    pub uuid: bool,
    pub allow_protected_fields: bool,
}

impl SaveOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Default::default()
        }
    }
}

/// Caller-facing arguments for find-style reads.
#[derive(Clone, Debug, Default)]
pub struct ReadArgs {
    pub filter: Option<RawDocument>,
    /// Legacy alias of `filter`.
    pub spec: Option<RawDocument>,
    pub fields: Option<Projection>,
    pub projection: Option<Projection>,
    /// `false` requests a cursor without idle timeout.
    pub timeout: Option<bool>,
    pub return_document: Option<String>,
    pub sort: Vec<(String, SortOrder)>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub batch_size: Option<u32>,
    pub read_use: Option<String>,
    pub max_time_ms: Option<u64>,
}

/// Result of [`ReadArgs::normalize`].
#[derive(Clone, Debug)]
pub struct NormalizedRead {
    pub filter: RawDocument,
    pub options: FindOptions,
    pub projection: Option<Projection>,
    pub fetched: Fetched,
    pub return_document: ReturnDocument,
    /// Explicit routing requested by the caller, if any.
    pub read_preference: Option<ReadPreference>,
}

impl NormalizedRead {
    /// Options for a find-and-modify call built from the same arguments.
    pub fn find_and_modify(&self, upsert: bool) -> FindAndModifyOptions {
        FindAndModifyOptions {
            projection: self.options.projection.clone(),
            sort: self.options.sort.clone(),
            upsert,
            return_document: self.return_document,
            max_time_ms: self.options.max_time_ms,
        }
    }
}

impl ReadArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: RawDocument) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_spec(mut self, spec: RawDocument) -> Self {
        self.spec = Some(spec);
        self
    }

    pub fn with_fields(mut self, fields: impl Into<Projection>) -> Self {
        self.fields = Some(fields.into());
        self
    }

    pub fn with_projection(mut self, projection: impl Into<Projection>) -> Self {
        self.projection = Some(projection.into());
        self
    }

    pub fn with_timeout(mut self, timeout: bool) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_return_document(mut self, which: impl Into<String>) -> Self {
        self.return_document = Some(which.into());
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_read_use(mut self, read_use: impl Into<String>) -> Self {
        self.read_use = Some(read_use.into());
        self
    }

    pub fn with_max_time_ms(mut self, max_time_ms: u64) -> Self {
        self.max_time_ms = Some(max_time_ms);
        self
    }

    /// Resolve shorthands into the store-facing form.
    pub fn normalize(self) -> Result<NormalizedRead> {
        let filter = match (self.filter, self.spec) {
            (Some(_), Some(_)) => {
                return Err(LayerError::InvalidArgument(
                    "pass either filter or spec, not both".into(),
                ))
            }
            (Some(f), None) | (None, Some(f)) => f,
            (None, None) => RawDocument::new(),
        };

        let projection = self.fields.or(self.projection);
        let return_document = match self.return_document.as_deref() {
            Some(which) => which.parse()?,
            None => ReturnDocument::default(),
        };
        let read_preference = self.read_use.as_deref().map(ReadPreference::from_read_use);

        let options = FindOptions {
            projection: projection.as_ref().map(Projection::normalize),
            sort: self.sort,
            skip: self.skip,
            limit: self.limit,
            batch_size: self.batch_size,
            no_cursor_timeout: self.timeout.map(|t| !t).unwrap_or(false),
            read_preference: read_preference.clone().unwrap_or_default(),
            max_time_ms: self.max_time_ms,
        };

        Ok(NormalizedRead {
            filter,
            options,
            fetched: fetched_for(projection.as_ref()),
            projection,
            return_document,
            read_preference,
        })
    }
}

impl From<RawDocument> for ReadArgs {
    fn from(filter: RawDocument) -> Self {
        ReadArgs::new().with_filter(filter)
    }
}
