//! gridmark-engine - mark schemes, cell comparison and question scoring.
//!
//! Nothing here touches the filesystem; workbooks arrive as already-loaded
//! [`engine::CellContent`] maps.

pub mod engine;
pub mod scheme;

pub use scheme::{
    CellSpec, ComparisonMode, FormatRuleSpec, MarkScheme, PartialCreditPolicy, QuestionKind, QuestionSpec,
    SchemeError, SchemeOptions,
};
