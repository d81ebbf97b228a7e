//! declarative format tables in JSON.
//!
//! the shape follows the usual YAML opcode tables for USSE: formats are
//! listed in match order, and each lists its members from the most significant bit down as
//! single-key objects. a member's value is one of
//!
//! * a string of `0`/`1`: a fixed member of that many bits,
//! * an integer: a plain field of that width,
//! * an object `{ "count": n, "offset": lsb, "match": "...", "signed": bool }`, where every key
//!   except `count` is optional.
//!
//! ```json
//! { "formats": [
//!     { "name": "spec",
//!       "members": [ { "op1": "11111" }, { "pred": 3 }, { "category": { "count": 3, "offset": 51 } } ],
//!       "discriminant": { "field": "category", "cases": [ { "value": 3, "name": "misc" } ] } }
//! ] }
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::TableError;
use crate::format::{FormatDefinition, LayoutBuilder};

#[derive(Debug, Deserialize)]
struct TableDoc {
    formats: Vec<FormatDoc>,
}

#[derive(Debug, Deserialize)]
struct FormatDoc {
    name: String,
    #[serde(default)]
    members: Vec<BTreeMap<String, MemberDoc>>,
    #[serde(default)]
    discriminant: Option<DiscriminantDoc>,
}

#[derive(Debug, Deserialize)]
struct DiscriminantDoc {
    field: String,
    cases: Vec<CaseDoc>,
}

#[derive(Debug, Deserialize)]
struct CaseDoc {
    value: u64,
    #[serde(flatten)]
    format: FormatDoc,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MemberDoc {
    Pattern(String),
    Width(u32),
    Detailed {
        count: u32,
        #[serde(default)]
        offset: Option<u32>,
        #[serde(default, rename = "match")]
        pattern: Option<String>,
        #[serde(default)]
        signed: bool,
    },
}

/// parse a JSON table into definitions, in the order they appear.
pub fn parse_table(json: &str) -> Result<Vec<FormatDefinition>, TableError> {
    let doc: TableDoc = serde_json::from_str(json)?;
    doc.formats
        .iter()
        .map(|format| -> Result<FormatDefinition, TableError> { Ok(layout(format)?.build()?) })
        .collect()
}

fn layout(doc: &FormatDoc) -> Result<LayoutBuilder, TableError> {
    let mut builder = FormatDefinition::layout(doc.name.as_str());
    for member in &doc.members {
        let mut entries = member.iter();
        let (name, spec) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(TableError::Member {
                    format: doc.name.clone(),
                    keys: member.len(),
                })
            }
        };
        builder = match spec {
            MemberDoc::Pattern(pattern) => builder.fixed(name, pattern),
            MemberDoc::Width(width) => builder.field(name, *width),
            MemberDoc::Detailed { count, offset, pattern, signed } => {
                builder.member(name, *offset, *count, *signed, pattern.as_deref())
            }
        };
    }
    if let Some(discriminant) = &doc.discriminant {
        let cases = discriminant
            .cases
            .iter()
            .map(|case| -> Result<(u64, LayoutBuilder), TableError> {
                Ok((case.value, layout(&case.format)?))
            })
            .collect::<Result<Vec<_>, TableError>>()?;
        builder = builder.discriminant(discriminant.field.as_str(), cases);
    }
    Ok(builder)
}
