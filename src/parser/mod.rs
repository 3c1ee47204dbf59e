pub mod locate;
pub mod rules;

use scraper::Html;

use crate::db::RecordFields;
pub use rules::{Field, Ruleset};

/// Apply a ruleset to a raw document. Never fails: fields whose locator finds
/// nothing keep the "N/A" fallback, and fields without a rule stay "N/A" too.
pub fn extract(html: &str, ruleset: &Ruleset) -> RecordFields {
    let doc = Html::parse_document(html);
    let mut fields = RecordFields::default();
    for rule in &ruleset.rules {
        if let Some(value) = locate::locate(&doc, &rule.locator) {
            let slot = match rule.field {
                Field::Name => &mut fields.name,
                Field::Address => &mut fields.address,
                Field::Phone => &mut fields.phone,
                Field::CompanyType => &mut fields.company_type,
                Field::TradesAndServices => &mut fields.trades_and_services,
                Field::MarketSectors => &mut fields.market_sectors,
            };
            *slot = value;
        }
    }
    fields
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NOT_AVAILABLE;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    #[test]
    fn full_profile() {
        let f = extract(&fixture("profile"), &Ruleset::business_profile());
        assert_eq!(f.name, "Big Sky Mechanical");
        assert_eq!(f.address, "1200 Main St, Billings, MT 59101");
        assert_eq!(f.phone, "(406) 555-0142");
        assert_eq!(f.company_type, "Specialty Contractor");
        assert_eq!(f.trades_and_services, "HVAC, Plumbing, Sheet Metal");
        assert_eq!(f.market_sectors, "Commercial, Healthcare, Education");
    }

    #[test]
    fn missing_phone_falls_back_alone() {
        let full = extract(&fixture("profile"), &Ruleset::business_profile());
        let f = extract(&fixture("profile_no_phone"), &Ruleset::business_profile());
        assert_eq!(f.phone, NOT_AVAILABLE);
        assert_eq!(
            RecordFields {
                phone: full.phone.clone(),
                ..f
            },
            full
        );
    }

    #[test]
    fn empty_document_is_all_fallback() {
        let f = extract("", &Ruleset::business_profile());
        assert_eq!(f, RecordFields::default());
    }

    #[test]
    fn fields_without_rules_stay_absent() {
        let rs = Ruleset {
            rules: vec![rules::Rule {
                field: Field::Name,
                locator: rules::Locator::Select { css: "h1".into() },
            }],
        };
        let f = extract(&fixture("profile"), &rs);
        assert_eq!(f.name, "Big Sky Mechanical");
        assert_eq!(f.address, NOT_AVAILABLE);
        assert_eq!(f.market_sectors, NOT_AVAILABLE);
    }
}
