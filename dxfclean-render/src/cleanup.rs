use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::RenderedSvg;

static SELF_CLOSING_RECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<rect\s+[^>]*/>").expect("自闭合 rect 正则应当合法")
});

static PAIRED_RECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<rect\s+[^>]*>.*?</rect>").expect("成对 rect 正则应当合法")
});

static SVG_OPEN_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<svg\b[^>]*>").expect("svg 起始标签正则应当合法"));

/// 白色背景矩形，`Replace` 策略插入在 `<svg>` 起始标签之后。
pub const WHITE_BACKGROUND: &str = r#"<rect width="100%" height="100%" fill="white"/>"#;

/// 渲染结果中画布矩形的处理方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CleanupPolicy {
    /// 删除所有 `<rect>` 元素。
    #[default]
    Strip,
    /// 删除后再插入一个白色满幅背景。
    Replace,
}

impl fmt::Display for CleanupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupPolicy::Strip => f.write_str("strip"),
            CleanupPolicy::Replace => f.write_str("replace"),
        }
    }
}

impl FromStr for CleanupPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strip" => Ok(CleanupPolicy::Strip),
            "replace" => Ok(CleanupPolicy::Replace),
            other => Err(format!("未知的清理策略：{other}")),
        }
    }
}

/// 清理后的 SVG，唯一的输出产物。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedSvg {
    pub markup: String,
    pub policy: CleanupPolicy,
}

impl CleanedSvg {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.markup
    }

    #[inline]
    pub fn into_string(self) -> String {
        self.markup
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.markup.as_bytes()
    }
}

impl fmt::Display for CleanedSvg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.markup)
    }
}

pub fn clean(rendered: &RenderedSvg, policy: CleanupPolicy) -> CleanedSvg {
    CleanedSvg {
        markup: clean_markup(&rendered.markup, policy),
        policy,
    }
}

/// 文本级清理。对自身输出再次应用时结果不变。
pub fn clean_markup(markup: &str, policy: CleanupPolicy) -> String {
    let stripped = strip_rects(markup);
    match policy {
        CleanupPolicy::Strip => stripped,
        CleanupPolicy::Replace => insert_background(&stripped),
    }
}

/// 当前的 `<rect>` 元素数量（自闭合与成对两种写法）。
pub fn count_rects(markup: &str) -> usize {
    SELF_CLOSING_RECT.find_iter(markup).count() + PAIRED_RECT.find_iter(markup).count()
}

fn strip_rects(markup: &str) -> String {
    let without_self_closing = SELF_CLOSING_RECT.replace_all(markup, "");
    let stripped = PAIRED_RECT.replace_all(&without_self_closing, "").into_owned();
    debug!(
        removed = markup.len() - stripped.len(),
        "已移除 rect 元素"
    );
    stripped
}

fn insert_background(markup: &str) -> String {
    match SVG_OPEN_TAG.find(markup) {
        Some(tag) => {
            let mut result = String::with_capacity(markup.len() + WHITE_BACKGROUND.len());
            result.push_str(&markup[..tag.end()]);
            result.push_str(WHITE_BACKGROUND);
            result.push_str(&markup[tag.end()..]);
            result
        }
        None => markup.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RENDERED: &str = concat!(
        r#"<svg height="5mm" viewBox="0 0 10 5" width="10mm" xmlns="http://www.w3.org/2000/svg">"#,
        "\n",
        r#"<rect fill="none" height="5" width="10" x="0" y="0"/>"#,
        "\n",
        r##"<g fill="none"><path d="M0,5 L10,5" stroke="#000000"/></g>"##,
        "\n</svg>"
    );

    #[test]
    fn strip_removes_self_closing_and_paired_rects() {
        let markup = format!(
            "{}<rect x=\"1\" y=\"1\">\n<title>frame</title>\n</rect>",
            RENDERED
        );
        let cleaned = clean_markup(&markup, CleanupPolicy::Strip);
        assert_eq!(count_rects(&cleaned), 0);
        assert!(!cleaned.contains("<rect"));
        assert!(cleaned.contains("<path"));
    }

    #[test]
    fn replace_inserts_single_white_background_after_svg_tag() {
        let cleaned = clean_markup(RENDERED, CleanupPolicy::Replace);
        assert_eq!(cleaned.matches("<rect").count(), 1);
        let tag_end = cleaned.find('>').expect("缺少 svg 起始标签") + 1;
        assert!(cleaned[tag_end..].starts_with(WHITE_BACKGROUND));
    }

    #[test]
    fn both_policies_are_idempotent() {
        for policy in [CleanupPolicy::Strip, CleanupPolicy::Replace] {
            let once = clean_markup(RENDERED, policy);
            let twice = clean_markup(&once, policy);
            assert_eq!(once, twice, "{policy} 策略应幂等");
        }
    }

    #[test]
    fn markup_without_svg_tag_is_left_alone() {
        assert_eq!(clean_markup("<g/>", CleanupPolicy::Replace), "<g/>");
    }

    #[test]
    fn policy_parses_from_text() {
        assert_eq!("Strip".parse::<CleanupPolicy>(), Ok(CleanupPolicy::Strip));
        assert_eq!(" replace ".parse::<CleanupPolicy>(), Ok(CleanupPolicy::Replace));
        assert!("erase".parse::<CleanupPolicy>().is_err());
    }
}
