use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use super::Timing;
use crate::render::Session;
use crate::settings::FilterToggle;

/// A bare `checked` attribute, `aria-checked="true"` or `data-state="checked"`.
static CHECKED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(\schecked(\s|=|/|>)|aria-checked="true"|data-state="checked")"#).unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    AlreadyActive,
    Activated,
    ActivatedOnRetry,
    Failed,
}

impl ToggleOutcome {
    pub fn is_active(self) -> bool {
        self != ToggleOutcome::Failed
    }
}

/// Switch a filter on if it is not already. Clicks first, then falls back to
/// a space key press once. Never fails the partition.
pub async fn apply_toggle(
    session: &mut dyn Session,
    toggle: &FilterToggle,
    timing: &Timing,
) -> ToggleOutcome {
    match session.wait_for(&toggle.selector, timing.wait).await {
        Ok(true) => {}
        Ok(false) => {
            warn!("Filter '{}' not found", toggle.name);
            return ToggleOutcome::Failed;
        }
        Err(e) => {
            warn!("Filter '{}' not found: {}", toggle.name, e);
            return ToggleOutcome::Failed;
        }
    }
    let _ = session.scroll_into_view(&toggle.selector).await;

    if is_active(session, &toggle.selector).await {
        info!("Filter '{}' already active", toggle.name);
        return ToggleOutcome::AlreadyActive;
    }

    if let Err(e) = session.click(&toggle.selector).await {
        warn!("Click on filter '{}' failed: {}", toggle.name, e);
    }
    tokio::time::sleep(timing.settle).await;
    if is_active(session, &toggle.selector).await {
        info!("Filter '{}' activated", toggle.name);
        return ToggleOutcome::Activated;
    }

    warn!("Filter '{}' did not activate on click, retrying with key press", toggle.name);
    if let Err(e) = session.press_key(&toggle.selector, " ").await {
        warn!("Key press on filter '{}' failed: {}", toggle.name, e);
    }
    tokio::time::sleep(timing.settle).await;
    if is_active(session, &toggle.selector).await {
        info!("Filter '{}' activated on retry", toggle.name);
        return ToggleOutcome::ActivatedOnRetry;
    }

    warn!("Could not activate filter '{}'; continuing without it", toggle.name);
    ToggleOutcome::Failed
}

async fn is_active(session: &mut dyn Session, selector: &str) -> bool {
    if let Ok(Some(state)) = session.read_attribute(selector, "aria-checked").await {
        return state == "true";
    }
    match session.read_outer_html(selector).await {
        Ok(Some(html)) => is_checked(&html),
        _ => false,
    }
}

fn is_checked(html: &str) -> bool {
    CHECKED_RE.is_match(html)
}
