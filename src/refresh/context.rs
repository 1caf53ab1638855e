//! Refresh reasons and the deduplicated reason set.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// Visible size of the status screen, in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewSize {
    pub width: f64,
    pub height: f64,
}

impl ViewSize {
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub fn is_landscape(&self) -> bool {
        self.width > self.height
    }
}

/// Why something must be recomputed on the next pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshContext {
    Status,
    Glucose,
    Insulin,
    Carbs,
    Targets,
    SizeChange(ViewSize),
}

impl RefreshContext {
    #[must_use]
    pub const fn kind(&self) -> ContextKind {
        match self {
            Self::Status => ContextKind::Status,
            Self::Glucose => ContextKind::Glucose,
            Self::Insulin => ContextKind::Insulin,
            Self::Carbs => ContextKind::Carbs,
            Self::Targets => ContextKind::Targets,
            Self::SizeChange(_) => ContextKind::SizeChange,
        }
    }
}

/// Payload-free discriminant of [`RefreshContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Status,
    Glucose,
    Insulin,
    Carbs,
    Targets,
    SizeChange,
}

impl ContextKind {
    /// Every kind, in display order.
    pub const ALL: [Self; 6] = [
        Self::Status,
        Self::Glucose,
        Self::Insulin,
        Self::Carbs,
        Self::Targets,
        Self::SizeChange,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Glucose => "glucose",
            Self::Insulin => "insulin",
            Self::Carbs => "carbs",
            Self::Targets => "targets",
            Self::SizeChange => "size_change",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Self::Status => 1,
            Self::Glucose => 1 << 1,
            Self::Insulin => 1 << 2,
            Self::Carbs => 1 << 3,
            Self::Targets => 1 << 4,
            Self::SizeChange => 1 << 5,
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Deduplicated, order-irrelevant set of refresh reasons.
///
/// At most one size change is held; inserting a newer one replaces the older.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RefreshContextSet {
    bits: u8,
    new_size: Option<ViewSize>,
}

impl RefreshContextSet {
    const DATA_MASK: u8 = 0b1_1111;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            bits: 0,
            new_size: None,
        }
    }

    /// The five data reasons (everything except a size change).
    #[must_use]
    pub const fn all() -> Self {
        Self {
            bits: Self::DATA_MASK,
            new_size: None,
        }
    }

    pub fn insert(&mut self, context: RefreshContext) {
        self.bits |= context.kind().bit();
        if let RefreshContext::SizeChange(size) = context {
            self.new_size = Some(size);
        }
    }

    #[must_use]
    pub fn with(mut self, context: RefreshContext) -> Self {
        self.insert(context);
        self
    }

    #[must_use]
    pub const fn contains(&self, kind: ContextKind) -> bool {
        self.bits & kind.bit() != 0
    }

    /// Merge `other` into `self`. A size change in `other` wins.
    pub fn union_with(&mut self, other: &Self) {
        self.bits |= other.bits;
        if other.new_size.is_some() {
            self.new_size = other.new_size;
        }
    }

    /// Move every reason out, leaving `self` empty.
    #[must_use]
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// The size carried by a pending size change, if any.
    #[must_use]
    pub const fn new_size(&self) -> Option<ViewSize> {
        self.new_size
    }

    /// True when every reason in `other` is also in `self`.
    #[must_use]
    pub const fn is_superset(&self, other: &Self) -> bool {
        self.bits & other.bits == other.bits
    }

    pub fn kinds(&self) -> impl Iterator<Item = ContextKind> + '_ {
        ContextKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }

    pub fn iter(&self) -> impl Iterator<Item = RefreshContext> + '_ {
        self.kinds().filter_map(move |kind| match kind {
            ContextKind::Status => Some(RefreshContext::Status),
            ContextKind::Glucose => Some(RefreshContext::Glucose),
            ContextKind::Insulin => Some(RefreshContext::Insulin),
            ContextKind::Carbs => Some(RefreshContext::Carbs),
            ContextKind::Targets => Some(RefreshContext::Targets),
            ContextKind::SizeChange => self.new_size.map(RefreshContext::SizeChange),
        })
    }

    #[must_use]
    pub fn labels(&self) -> Vec<&'static str> {
        self.kinds().map(ContextKind::label).collect()
    }
}

impl FromIterator<RefreshContext> for RefreshContextSet {
    fn from_iter<I: IntoIterator<Item = RefreshContext>>(iter: I) -> Self {
        let mut set = Self::new();
        for context in iter {
            set.insert(context);
        }
        set
    }
}

impl Extend<RefreshContext> for RefreshContextSet {
    fn extend<I: IntoIterator<Item = RefreshContext>>(&mut self, iter: I) {
        for context in iter {
            self.insert(context);
        }
    }
}

impl fmt::Display for RefreshContextSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, kind) in self.kinds().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            f.write_str(kind.label())?;
        }
        f.write_str("}")
    }
}
