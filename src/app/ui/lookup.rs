use std::fmt;

use tracing::{debug, info, warn};

use crate::app::ui::driver::{Point, UiDriver};

pub const SKIP_AD_TEXT: &str = "跳过";
pub const SKIP_AD_FALLBACK: Point = Point::new(1139, 214);

/// One way of finding something to click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupStrategy {
    TextAndType { text: String, node_type: String },
    Text(String),
    TextContains(String),
    FixedPoint(Point),
}

impl fmt::Display for LookupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupStrategy::TextAndType { text, node_type } => write!(f, "{node_type}[text={text}]"),
            LookupStrategy::Text(text) => write!(f, "text={text}"),
            LookupStrategy::TextContains(text) => write!(f, "text~{text}"),
            LookupStrategy::FixedPoint(point) => write!(f, "point({},{})", point.x, point.y),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("no lookup strategy matched ({} tried)", tried.len())]
    NotFound { tried: Vec<LookupStrategy> },
}

/// Splash-ad skip button: exact text, then substring, then the known corner position.
pub fn skip_ad_strategies() -> Vec<LookupStrategy> {
    vec![
        LookupStrategy::Text(SKIP_AD_TEXT.to_string()),
        LookupStrategy::TextContains(SKIP_AD_TEXT.to_string()),
        LookupStrategy::FixedPoint(SKIP_AD_FALLBACK),
    ]
}

fn resolve(driver: &dyn UiDriver, strategy: &LookupStrategy, trace_id: &str) -> Option<Point> {
    let found = match strategy {
        LookupStrategy::TextAndType { text, node_type } => {
            driver.find_by_text(text, true, Some(node_type), trace_id)
        }
        LookupStrategy::Text(text) => driver.find_by_text(text, true, None, trace_id),
        LookupStrategy::TextContains(text) => driver.find_by_text(text, false, None, trace_id),
        LookupStrategy::FixedPoint(point) => return Some(*point),
    };
    match found {
        Ok(point) => point,
        Err(err) => {
            warn!(trace_id = %trace_id, strategy = %strategy, error = %err, "lookup failed");
            None
        }
    }
}

/// Tries each strategy in order and clicks the first one that resolves.
/// Returns the strategy that produced the click.
pub fn click_first_match(
    driver: &dyn UiDriver,
    strategies: &[LookupStrategy],
    trace_id: &str,
) -> Result<LookupStrategy, LookupError> {
    let mut tried = Vec::with_capacity(strategies.len());
    for strategy in strategies {
        tried.push(strategy.clone());
        let Some(point) = resolve(driver, strategy, trace_id) else {
            debug!(trace_id = %trace_id, strategy = %strategy, "no match");
            continue;
        };
        match driver.touch(point, trace_id) {
            Ok(()) => {
                info!(trace_id = %trace_id, strategy = %strategy, x = point.x, y = point.y, "clicked");
                return Ok(strategy.clone());
            }
            Err(err) => {
                warn!(trace_id = %trace_id, strategy = %strategy, error = %err, "click failed");
            }
        }
    }
    Err(LookupError::NotFound { tried })
}
