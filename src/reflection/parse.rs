//! 第二档：对普通文本输出做容错的结构化解析
//!
//! 期望形如 `RATIONALE: ...` / `PROPOSED CHANGE: ...` / `IMPACT: ...` 的分段，
//! 容忍大小写、Markdown 列表符与加粗、全角冒号以及跨行续写。

use std::sync::OnceLock;

use regex::Regex;

use crate::reflection::schema::{normalize_optional, NarrativeFields};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Rationale,
    Change,
    Impact,
}

fn label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:[-*•]\s*)?(?:#+\s*)?(?:\*\*|__)?\s*(rationale|reasoning|reason|proposed[ _-]?change|change|impact)\s*(?:\*\*|__)?\s*[:：]\s*(?:\*\*|__)?\s*(.*)$",
        )
        .expect("label regex is valid")
    })
}

fn field_of(label: &str) -> Field {
    let l = label.to_lowercase();
    if l.starts_with("reason") || l == "rationale" {
        Field::Rationale
    } else if l == "impact" {
        Field::Impact
    } else {
        Field::Change
    }
}

/// 解析标签分段；至少要有非空的 rationale 才算成功
pub fn parse_narrative(text: &str) -> Result<NarrativeFields, String> {
    let mut rationale: Option<String> = None;
    let mut change: Option<String> = None;
    let mut impact: Option<String> = None;
    let mut current: Option<Field> = None;

    for line in text.lines() {
        let (field, content) = match label_regex().captures(line) {
            Some(caps) => {
                let field = field_of(&caps[1]);
                current = Some(field);
                (field, caps.get(2).map(|m| m.as_str()).unwrap_or(""))
            }
            None => match current {
                Some(field) => (field, line),
                None => continue,
            },
        };

        let content = content.trim().trim_matches('*').trim();
        if content.is_empty() {
            continue;
        }
        let slot = match field {
            Field::Rationale => &mut rationale,
            Field::Change => &mut change,
            Field::Impact => &mut impact,
        };
        match slot {
            Some(existing) => {
                existing.push(' ');
                existing.push_str(content);
            }
            None => *slot = Some(content.to_string()),
        }
    }

    let rationale = normalize_optional(rationale)
        .ok_or_else(|| "no rationale section found".to_string())?;
    let fields = NarrativeFields {
        rationale,
        proposed_change: normalize_optional(change),
        impact: normalize_optional(impact),
    };
    fields.validate()?;
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_labels() {
        let out = "RATIONALE: The tool answered quickly.\nPROPOSED CHANGE: none\nIMPACT: n/a";
        let n = parse_narrative(out).unwrap();
        assert_eq!(n.rationale, "The tool answered quickly.");
        assert!(n.proposed_change.is_none());
        assert!(n.impact.is_none());
    }

    #[test]
    fn test_parse_markdown_and_continuation() {
        let out = "Here is my reflection:\n\n- **Rationale**: Routing picked the delegate\n  because the request needed long reasoning.\n- **Proposed_change:** Cache the answer.\n- **Impact**: Fewer delegate calls.";
        let n = parse_narrative(out).unwrap();
        assert_eq!(
            n.rationale,
            "Routing picked the delegate because the request needed long reasoning."
        );
        assert_eq!(n.proposed_change.as_deref(), Some("Cache the answer."));
        assert_eq!(n.impact.as_deref(), Some("Fewer delegate calls."));
    }

    #[test]
    fn test_parse_fullwidth_colon() {
        let n = parse_narrative("reason：超时后重试成功").unwrap();
        assert_eq!(n.rationale, "超时后重试成功");
    }

    #[test]
    fn test_parse_without_rationale_fails() {
        assert!(parse_narrative("I think it went fine.").is_err());
        assert!(parse_narrative("IMPACT: big").is_err());
        assert!(parse_narrative("Rationale: none").is_err());
    }
}
