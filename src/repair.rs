use std::ops::RangeInclusive;

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use tracing::debug;

/// One source-specific structural repair, keyed by the contest years whose
/// pages exhibit the defect. Rules run in table order. Each must be a no-op
/// on markup it has already repaired: cached pages are stored post-repair
/// and run through the table again on a cache hit.
pub struct RepairRule {
    pub name: &'static str,
    years: RangeInclusive<u32>,
    apply: fn(&str) -> Result<String>,
}

impl RepairRule {
    pub fn applies_to(&self, year: u32) -> bool {
        self.years.contains(&year)
    }

    pub fn apply(&self, html: &str) -> Result<String> {
        (self.apply)(html)
    }
}

pub const REPAIR_RULES: &[RepairRule] = &[
    RepairRule {
        name: "close-meta-tags",
        years: 2009..=2011,
        apply: close_meta_tags,
    },
    RepairRule {
        name: "strip-form-wrappers",
        years: 2003..=2006,
        apply: strip_form_wrappers,
    },
    RepairRule {
        name: "decode-named-entities",
        years: 2003..=2010,
        apply: decode_named_entities,
    },
    RepairRule {
        name: "tag-tables-by-position",
        years: 2003..=2008,
        apply: tag_tables_by_position,
    },
    RepairRule {
        name: "unwrap-flagged-cell",
        years: 2005..=2005,
        apply: unwrap_flagged_cell,
    },
];

/// Applies every rule whose year range covers `year`, in table order.
pub fn apply_repairs(html: &str, year: u32) -> Result<String> {
    let mut repaired = html.to_string();

    for rule in REPAIR_RULES {
        if !rule.applies_to(year) {
            continue;
        }
        repaired = rule
            .apply(&repaired)
            .with_context(|| format!("repair rule {} failed for year {year}", rule.name))?;
        debug!(rule = rule.name, year, "applied repair rule");
    }

    Ok(repaired)
}

/// Standings pages 2009-2011 ship an unclosed `<meta …>` in the head.
fn close_meta_tags(html: &str) -> Result<String> {
    let pattern =
        Regex::new(r"(?i)<meta([^>]*[^/>])>").context("failed to compile meta tag regex")?;
    Ok(pattern.replace_all(html, "<meta$1/>").into_owned())
}

/// Early pages wrap blocks of table rows in `<form>` elements, which breaks
/// row nesting. The forms carry no data; drop the tags wholesale.
fn strip_form_wrappers(html: &str) -> Result<String> {
    let pattern =
        Regex::new(r"(?i)</?form[^>]*>").context("failed to compile form tag regex")?;
    Ok(pattern.replace_all(html, "").into_owned())
}

const ENTITY_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("&eacute;", "é"),
    ("&Eacute;", "É"),
    ("&aacute;", "á"),
    ("&oacute;", "ó"),
    ("&uacute;", "ú"),
    ("&auml;", "ä"),
    ("&ouml;", "ö"),
    ("&uuml;", "ü"),
    ("&nbsp;", "\u{a0}"),
];

/// Pre-2011 pages spell accented university names with named character
/// references instead of literal characters; substitute the literals so the
/// extracted text matches later years.
fn decode_named_entities(html: &str) -> Result<String> {
    let mut decoded = html.to_string();
    for (entity, literal) in ENTITY_SUBSTITUTIONS {
        decoded = decoded.replace(entity, literal);
    }
    Ok(decoded)
}

/// Pages up to 2008 carry no id attributes at all. By observed document
/// order, the first table is the full ranking and the next three are region
/// sub-tables, the third of which is the region-to-university mapping.
/// Purely positional; if the page's table order ever changes this mis-tags
/// silently.
fn tag_tables_by_position(html: &str) -> Result<String> {
    const POSITIONAL_IDS: [&str; 4] = ["rank", "region-1", "region-2", "region"];

    let pattern =
        Regex::new(r"(?i)<table([^>]*)>").context("failed to compile table tag regex")?;
    let mut next = 0_usize;

    let repaired = pattern.replace_all(html, |caps: &Captures<'_>| {
        let attrs = &caps[1];
        if attrs.contains("id=") || next >= POSITIONAL_IDS.len() {
            return caps[0].to_string();
        }
        let id = POSITIONAL_IDS[next];
        next += 1;
        format!("<table id=\"{id}\"{attrs}>")
    });

    Ok(repaired.into_owned())
}

/// The 2005 page wraps one university cell's text in a stray red `<font>`.
fn unwrap_flagged_cell(html: &str) -> Result<String> {
    Ok(html
        .replace("<font color=\"red\">", "")
        .replace("</font>", ""))
}
