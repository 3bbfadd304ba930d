use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::app::ui::driver::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn center(&self) -> Point {
        Point::new((self.left + self.right) / 2, (self.top + self.bottom) / 2)
    }

    pub fn width(&self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }
}

fn bounds_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]$").expect("bounds regex")
    })
}

/// Parses `"[l,t][r,b]"`.
pub fn parse_bounds(raw: &str) -> Option<Bounds> {
    let caps = bounds_re().captures(raw.trim())?;
    let field = |idx: usize| caps.get(idx)?.as_str().parse::<i32>().ok();
    Some(Bounds {
        left: field(1)?,
        top: field(2)?,
        right: field(3)?,
        bottom: field(4)?,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeAttributes {
    pub text: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub bounds: String,
}

/// One node of a `uitest dumpLayout` tree.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LayoutNode {
    pub attributes: NodeAttributes,
    pub children: Vec<LayoutNode>,
}

impl LayoutNode {
    pub fn bounds(&self) -> Option<Bounds> {
        parse_bounds(&self.attributes.bounds)
    }

    /// Depth-first, pre-order search for the first node matching `text` (and `node_type` when given).
    pub fn find(&self, text: &str, exact: bool, node_type: Option<&str>) -> Option<&LayoutNode> {
        if self.matches(text, exact, node_type) {
            return Some(self);
        }
        self.children
            .iter()
            .find_map(|child| child.find(text, exact, node_type))
    }

    fn matches(&self, text: &str, exact: bool, node_type: Option<&str>) -> bool {
        let attrs = &self.attributes;
        if attrs.text.is_empty() {
            return false;
        }
        let text_ok = if exact {
            attrs.text == text
        } else {
            attrs.text.contains(text)
        };
        text_ok && node_type.map_or(true, |wanted| attrs.node_type == wanted)
    }
}

pub fn parse_layout(json: &str) -> Result<LayoutNode, String> {
    serde_json::from_str(json.trim()).map_err(|err| format!("Failed to parse layout: {err}"))
}

/// Centre of the first matching node that has usable bounds.
pub fn locate_text(root: &LayoutNode, text: &str, exact: bool, node_type: Option<&str>) -> Option<Point> {
    root.find(text, exact, node_type)?
        .bounds()
        .map(|bounds| bounds.center())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: &str = r#"{
        "attributes": {"bounds": "[0,0][1260,2720]", "type": "root", "text": ""},
        "children": [
            {
                "attributes": {"bounds": "[0,0][1260,400]", "type": "Column", "text": ""},
                "children": [
                    {"attributes": {"bounds": "[1080,180][1200,250]", "type": "Text", "text": "跳过 5"}, "children": []},
                    {"attributes": {"bounds": "[100,300][300,360]", "type": "Button", "text": "跳过"}, "children": []}
                ]
            },
            {"attributes": {"bounds": "[0,2600][1260,2720]", "type": "Text", "text": "首页", "id": "tab"}}
        ]
    }"#;

    #[test]
    fn parses_bounds() {
        assert_eq!(
            parse_bounds("[1080,180][1200,250]"),
            Some(Bounds {
                left: 1080,
                top: 180,
                right: 1200,
                bottom: 250
            })
        );
        assert_eq!(parse_bounds("[1,2][3]"), None);
        assert_eq!(parse_bounds(""), None);
    }

    #[test]
    fn exact_match_skips_partial_text() {
        let root = parse_layout(LAYOUT).expect("layout");
        assert_eq!(locate_text(&root, "跳过", true, None), Some(Point::new(200, 330)));
    }

    #[test]
    fn contains_match_returns_first_in_document_order() {
        let root = parse_layout(LAYOUT).expect("layout");
        assert_eq!(locate_text(&root, "跳过", false, None), Some(Point::new(1140, 215)));
    }

    #[test]
    fn type_filter_applies() {
        let root = parse_layout(LAYOUT).expect("layout");
        assert_eq!(locate_text(&root, "跳过", true, Some("Text")), None);
        assert_eq!(
            locate_text(&root, "跳过", false, Some("Text")),
            Some(Point::new(1140, 215))
        );
    }

    #[test]
    fn root_bounds_give_window_size() {
        let root = parse_layout(LAYOUT).expect("layout");
        let bounds = root.bounds().expect("bounds");
        assert_eq!((bounds.width(), bounds.height()), (1260, 2720));
    }

    #[test]
    fn rejects_non_json() {
        assert!(parse_layout("ERROR: dump failed").is_err());
    }
}
