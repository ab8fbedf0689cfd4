//! Parsers for SVN XML output.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::VcsError;

/// The fields of `svn info --xml <path>` the backend uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvnInfo {
    /// `file` or `dir`.
    pub kind: String,
    pub url: String,
    /// Revision the working copy item was last changed in. `None` for items
    /// scheduled for addition.
    pub commit_revision: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvnLogEntry {
    pub revision: i64,
    pub author: String,
    pub date: String,
    pub message: String,
}

/// Working copy status of a single item from `svn status --xml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvnStatus {
    pub path: String,
    /// `normal`, `modified`, `added`, `unversioned`, ...
    pub item: String,
}

impl SvnStatus {
    pub fn is_versioned(&self) -> bool {
        !matches!(self.item.as_str(), "unversioned" | "ignored" | "none")
    }

    pub fn has_local_changes(&self) -> bool {
        matches!(
            self.item.as_str(),
            "modified" | "added" | "deleted" | "replaced" | "conflicted" | "merged"
        )
    }
}

pub fn parse_svn_info(xml: &str) -> Result<SvnInfo, VcsError> {
    debug!("parsing svn info XML ({} bytes)", xml.len());
    let url = extract_tag_content(xml, "url")
        .ok_or_else(|| VcsError::XmlParseError("missing <url> in svn info".into()))?;
    let kind = extract_attribute(xml, "entry", "kind")
        .ok_or_else(|| VcsError::XmlParseError("missing entry kind in svn info".into()))?;
    let commit_revision = extract_attribute(xml, "commit", "revision")
        .and_then(|s| s.parse::<i64>().ok())
        .filter(|rev| *rev > 0);
    Ok(SvnInfo {
        kind,
        url,
        commit_revision,
    })
}

pub fn parse_svn_log(xml: &str) -> Result<Vec<SvnLogEntry>, VcsError> {
    debug!("parsing svn log XML ({} bytes)", xml.len());
    let mut entries = Vec::new();
    for part in xml.split("<logentry").skip(1) {
        let entry_xml = match part.find("</logentry>") {
            Some(pos) => &part[..pos],
            None => part,
        };
        let revision = match extract_attr_from_str(entry_xml, "revision")
            .and_then(|s| s.parse::<i64>().ok())
        {
            Some(rev) => rev,
            None => {
                warn!("skipping SVN log entry with missing or unparseable revision attribute");
                continue;
            }
        };
        entries.push(SvnLogEntry {
            revision,
            author: extract_tag_content(entry_xml, "author").unwrap_or_default(),
            date: extract_tag_content(entry_xml, "date").unwrap_or_default(),
            message: extract_tag_content(entry_xml, "msg").unwrap_or_default(),
        });
    }
    debug!(count = entries.len(), "parsed svn log entries");
    Ok(entries)
}

/// Parse `svn status --xml`. Returns the first `<entry>`; `None` when the
/// output lists no entries, which is how svn reports an unmodified file.
pub fn parse_svn_status(xml: &str) -> Result<Option<SvnStatus>, VcsError> {
    debug!("parsing svn status XML ({} bytes)", xml.len());
    let Some(part) = xml.split("<entry").nth(1) else {
        return Ok(None);
    };
    let entry_xml = match part.find("</entry>") {
        Some(pos) => &part[..pos],
        None => part,
    };
    let path = extract_attr_from_str(entry_xml, "path").unwrap_or_default();
    let item = extract_attribute(entry_xml, "wc-status", "item")
        .ok_or_else(|| VcsError::XmlParseError("missing wc-status item in svn status".into()))?;
    Ok(Some(SvnStatus {
        path: xml_unescape(&path),
        item,
    }))
}

fn extract_tag_content(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut search_from = 0;
    while let Some(rel_pos) = xml[search_from..].find(&open) {
        let start_pos = search_from + rel_pos;
        let after_open = &xml[start_pos + open.len()..];
        // <url> must not match <urlencoded>
        if let Some(ch) = after_open.chars().next() {
            if ch != '>' && !ch.is_ascii_whitespace() {
                search_from = start_pos + open.len();
                continue;
            }
        }
        let content_start = after_open.find('>')? + 1;
        let content = &after_open[content_start..];
        let end_pos = content.find(&close)?;
        return Some(xml_unescape(content[..end_pos].trim()));
    }
    None
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn extract_attribute(xml: &str, tag: &str, attr: &str) -> Option<String> {
    let open = format!("<{}", tag);
    let start_pos = xml.find(&open)?;
    let after_tag = &xml[start_pos + open.len()..];
    let tag_end = after_tag.find('>')?;
    extract_attr_from_str(&after_tag[..tag_end], attr)
}

fn extract_attr_from_str(s: &str, attr: &str) -> Option<String> {
    for quote in ['"', '\''] {
        let pattern = format!("{}={}", attr, quote);
        let mut search_from = 0;
        while let Some(rel_pos) = s[search_from..].find(&pattern) {
            let pos = search_from + rel_pos;
            search_from = pos + pattern.len();
            // must be a whole attribute name, not the tail of another one
            let at_boundary = s[..pos]
                .chars()
                .next_back()
                .map_or(true, |c| c.is_ascii_whitespace());
            if !at_boundary {
                continue;
            }
            let after = &s[search_from..];
            let end = after.find(quote)?;
            return Some(after[..end].to_string());
        }
    }
    None
}
