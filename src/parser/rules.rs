use std::path::Path;

use config::{Config, File};
use scraper::Selector;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    Address,
    Phone,
    CompanyType,
    TradesAndServices,
    MarketSectors,
}

/// Where a field's value lives in a document.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    /// First element matching `css`.
    Select { css: String },
    /// First `target` element after the `anchor` element in document order.
    After { anchor: String, target: String },
    /// A `heading` whose text contains `contains`, then the next `container`,
    /// then the first `inner` match inside it.
    Section {
        heading: String,
        contains: String,
        container: String,
        inner: String,
    },
}

impl Locator {
    fn selectors(&self) -> Vec<&str> {
        match self {
            Locator::Select { css } => vec![css],
            Locator::After { anchor, target } => vec![anchor, target],
            Locator::Section {
                heading,
                container,
                inner,
                ..
            } => vec![heading, container, inner],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    pub field: Field,
    #[serde(flatten)]
    pub locator: Locator,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ruleset {
    pub rules: Vec<Rule>,
}

#[derive(Debug, Error)]
pub enum RulesetError {
    #[error("failed to load ruleset: {0}")]
    Load(#[from] config::ConfigError),
    #[error("rule for {field:?} has an invalid selector: {selector}")]
    InvalidSelector { field: Field, selector: String },
}

impl Ruleset {
    /// Load a ruleset from a TOML file with one `[[rules]]` table per field.
    pub fn load(path: &Path) -> Result<Self, RulesetError> {
        let ruleset: Ruleset = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;
        ruleset.validate()?;
        Ok(ruleset)
    }

    fn validate(&self) -> Result<(), RulesetError> {
        for rule in &self.rules {
            for css in rule.locator.selectors() {
                if Selector::parse(css).is_err() {
                    return Err(RulesetError::InvalidSelector {
                        field: rule.field,
                        selector: css.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Business profile pages of the construction network directory.
    pub fn business_profile() -> Self {
        let select = |field, css: &str| Rule {
            field,
            locator: Locator::Select { css: css.into() },
        };
        Ruleset {
            rules: vec![
                select(Field::Name, "h1"),
                select(
                    Field::Address,
                    r#"a[data-track-click="Business Profile Header, Navigation, Business Address"]"#,
                ),
                Rule {
                    field: Field::Phone,
                    locator: Locator::After {
                        anchor: r#"svg[data-qa="ci-Phone"]"#.into(),
                        target: "p".into(),
                    },
                },
                select(
                    Field::CompanyType,
                    r#"p[data-test-id="business-profile-nav-about-business-types"]"#,
                ),
                Rule {
                    field: Field::TradesAndServices,
                    locator: Locator::Section {
                        heading: "h2".into(),
                        contains: "Trades and Services".into(),
                        container: "div".into(),
                        inner: r#"[data-test-id="expandable-text"] span"#.into(),
                    },
                },
                select(
                    Field::MarketSectors,
                    r#"p[data-test-id="business-profile-nav-about-market-sectors"]"#,
                ),
            ],
        }
    }
}

impl Default for Ruleset {
    fn default() -> Self {
        Ruleset::business_profile()
    }
}
