//! CSV report writer - window summary, growth metrics, payout table,
//! and transaction detail, one section per block.

use crate::reconcile_core::metrics::{SubscriptionMetrics, UserMetrics};
use crate::reconcile_core::normalizer::TransactionRecord;
use crate::reconcile_core::payouts::InfluencerPayout;
use crate::window::ReportingWindow;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

pub struct ReportData<'a> {
    pub run_id: &'a str,
    pub window: &'a ReportingWindow,
    pub user_metrics: &'a UserMetrics,
    pub subscription_metrics: &'a SubscriptionMetrics,
    pub payouts: &'a HashMap<String, InfluencerPayout>,
    pub transactions: &'a [TransactionRecord],
    pub total_revenue: Decimal,
    pub total_affiliate_payout: Decimal,
    pub currency: &'a str,
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn write_row<W: Write>(writer: &mut W, fields: &[&str]) -> std::io::Result<()> {
    let row: Vec<String> = fields.iter().map(|f| csv_escape(f)).collect();
    writeln!(writer, "{}", row.join(","))
}

fn format_currency(amount: Decimal, currency: &str) -> String {
    format!("{} {:.2}", currency, amount)
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn format_pct(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

/// Render the run report. The parent directory is created if needed.
pub fn render_csv(output_path: &Path, data: &ReportData) -> std::io::Result<()> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let payout_mode = if data.payouts.is_empty() {
        "No referral payouts calculated"
    } else if data.payouts.values().all(|p| p.dry_run) {
        "Dry-run (no transfers executed)"
    } else {
        "Live (transfers executed where possible)"
    };

    let file = File::create(output_path)?;
    let mut writer = BufWriter::new(file);

    // Summary
    write_row(&mut writer, &["Section", "Field", "Value"])?;
    write_row(&mut writer, &["Report", "Run ID", data.run_id])?;
    write_row(
        &mut writer,
        &[
            "Report",
            "Reporting window",
            &format!(
                "{} to {}",
                format_timestamp(data.window.start),
                format_timestamp(data.window.end)
            ),
        ],
    )?;
    write_row(
        &mut writer,
        &["Report", "Generated at", &format_timestamp(Utc::now())],
    )?;
    write_row(&mut writer, &["Report", "Payout mode", payout_mode])?;
    write_row(
        &mut writer,
        &[
            "Report",
            "Total Revenue",
            &format_currency(data.total_revenue, data.currency),
        ],
    )?;
    write_row(
        &mut writer,
        &[
            "Report",
            "Total Affiliate Share",
            &format_currency(data.total_affiliate_payout, data.currency),
        ],
    )?;
    write_row(
        &mut writer,
        &[
            "Report",
            "Influencers with activity",
            &data.payouts.len().to_string(),
        ],
    )?;
    writeln!(writer)?;

    // User metrics
    let users = data.user_metrics;
    write_row(&mut writer, &["User Metrics"])?;
    write_row(&mut writer, &["Metric", "Value"])?;
    write_row(&mut writer, &["Total users", &users.total_users.to_string()])?;
    write_row(
        &mut writer,
        &["New users in window", &users.new_users.to_string()],
    )?;
    write_row(
        &mut writer,
        &["Total referred users", &users.total_referred_users.to_string()],
    )?;
    write_row(
        &mut writer,
        &["New referred users", &users.new_referred_users.to_string()],
    )?;
    write_row(
        &mut writer,
        &[
            "Share of new users referred",
            &format_pct(users.new_referred_ratio),
        ],
    )?;
    write_row(
        &mut writer,
        &[
            "Share of total users referred",
            &format_pct(users.total_referred_ratio),
        ],
    )?;
    writeln!(writer)?;

    // Subscription metrics
    let subs = data.subscription_metrics;
    write_row(&mut writer, &["Subscription Metrics"])?;
    write_row(&mut writer, &["Metric", "Count"])?;
    for (label, class) in [
        ("Monthly", &subs.monthly),
        ("Yearly", &subs.yearly),
        ("Lifetime", &subs.lifetime),
    ] {
        write_row(
            &mut writer,
            &[
                &format!("New {} Subscribers", label),
                &class.new_subscribers.to_string(),
            ],
        )?;
        write_row(
            &mut writer,
            &[
                &format!("Active {} Subscribers", label),
                &class.active_subscribers.to_string(),
            ],
        )?;
    }
    writeln!(writer)?;

    // Influencer payouts, sorted by code for a stable report
    write_row(&mut writer, &["Influencer Payouts"])?;
    write_row(
        &mut writer,
        &[
            "Referral Code",
            "Influencer",
            "State",
            "Transactions",
            "Revenue",
            "Payout",
            "Transfer",
            "Notes",
        ],
    )?;
    if data.payouts.is_empty() {
        write_row(
            &mut writer,
            &["", "", "", "", "", "", "", "No referral-driven transactions in period"],
        )?;
    } else {
        let mut codes: Vec<&String> = data.payouts.keys().collect();
        codes.sort();
        for code in codes {
            let payout = &data.payouts[code];
            let transfer_label = payout
                .transfer_id
                .clone()
                .unwrap_or_else(|| if payout.dry_run { "dry-run".to_string() } else { String::new() });
            let state_label = payout.state.map(|s| s.as_str()).unwrap_or("");

            let mut note_parts: Vec<String> = Vec::new();
            if let Some(frequency) = &payout.payout_frequency {
                note_parts.push(format!("Freq: {}", frequency));
            }
            note_parts.extend(payout.notes.iter().cloned());

            write_row(
                &mut writer,
                &[
                    code,
                    payout.influencer_name.as_deref().unwrap_or(""),
                    state_label,
                    &payout.transaction_count.to_string(),
                    &format_currency(payout.total_revenue, data.currency),
                    &format_currency(payout.total_payout, data.currency),
                    &transfer_label,
                    &note_parts.join("; "),
                ],
            )?;
        }
    }
    writeln!(writer)?;

    // Transaction detail
    write_row(&mut writer, &["Transaction Detail"])?;
    write_row(
        &mut writer,
        &[
            "Date",
            "User",
            "Referral",
            "Product",
            "Amount",
            "Reason",
            "Environment",
            "Transaction ID",
        ],
    )?;
    let mut transactions: Vec<&TransactionRecord> = data.transactions.iter().collect();
    transactions.sort_by_key(|t| t.purchase_date);
    for tx in transactions {
        write_row(
            &mut writer,
            &[
                &format_timestamp(tx.purchase_date),
                &tx.user_id,
                tx.referral_code.as_deref().unwrap_or(""),
                &tx.product_id,
                &format!("{:.2} {}", tx.price, tx.currency),
                tx.transaction_reason.as_deref().unwrap_or(""),
                &tx.environment,
                &tx.transaction_id,
            ],
        )?;
    }

    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile_core::metrics::ProductClassMetrics;
    use crate::reconcile_core::transfer::PayoutState;
    use chrono::NaiveDateTime;
    use tempfile::tempdir;

    fn ts(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn create_test_payout() -> InfluencerPayout {
        InfluencerPayout {
            referral_code: "ALICE10".to_string(),
            influencer_name: Some("Alice, LLC".to_string()),
            influencer_email: None,
            payout_account_id: Some("acct_123".to_string()),
            payout_provider: None,
            payout_frequency: Some("monthly".to_string()),
            total_revenue: dec("119.98"),
            total_payout: dec("48.00"),
            transaction_count: 2,
            transaction_ids: vec!["t1".to_string(), "t2".to_string()],
            existing_total_paid: dec("48.00"),
            currency: "USD".to_string(),
            transfer_id: Some("tr_1".to_string()),
            dry_run: false,
            state: Some(PayoutState::Executed),
            notes: vec!["Transfer tr_1 sent.".to_string()],
        }
    }

    #[test]
    fn test_csv_escape() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_render_report_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reports").join("run1.csv");

        let window =
            ReportingWindow::new(ts("2026-01-01 00:00:00"), ts("2026-01-08 00:00:00")).unwrap();
        let user_metrics = UserMetrics {
            total_users: 10,
            new_users: 2,
            total_referred_users: 3,
            new_referred_users: 1,
            new_referred_ratio: 0.5,
            total_referred_ratio: 0.3,
        };
        let subscription_metrics = SubscriptionMetrics {
            monthly: ProductClassMetrics::default(),
            yearly: ProductClassMetrics {
                new_subscribers: 1,
                active_subscribers: 2,
                new_referred_ratio: 1.0,
                active_referred_ratio: 0.5,
            },
            lifetime: ProductClassMetrics::default(),
        };
        let mut payouts = HashMap::new();
        payouts.insert("ALICE10".to_string(), create_test_payout());
        let transactions = vec![TransactionRecord {
            user_id: "u1".to_string(),
            referral_code: Some("ALICE10".to_string()),
            product_id: "yearly".to_string(),
            purchase_date: ts("2026-01-02 12:00:00"),
            price: dec("29.99"),
            currency: "USD".to_string(),
            transaction_reason: None,
            original_transaction_id: "orig".to_string(),
            environment: "Production".to_string(),
            transaction_id: "t1".to_string(),
        }];

        let data = ReportData {
            run_id: "20260108_120000",
            window: &window,
            user_metrics: &user_metrics,
            subscription_metrics: &subscription_metrics,
            payouts: &payouts,
            transactions: &transactions,
            total_revenue: dec("119.98"),
            total_affiliate_payout: dec("48.00"),
            currency: "USD",
        };

        render_csv(&path, &data).unwrap();
        let contents = fs::read_to_string(&path).unwrap();

        assert!(contents.contains("Run ID,20260108_120000"));
        assert!(contents.contains("Live (transfers executed where possible)"));
        assert!(contents.contains("Total Revenue,USD 119.98"));
        assert!(contents.contains("User Metrics"));
        assert!(contents.contains("Share of new users referred,50.0%"));
        assert!(contents.contains("New Yearly Subscribers,1"));
        // Comma inside the influencer name must be quoted
        assert!(contents.contains("ALICE10,\"Alice, LLC\",EXECUTED,2,USD 119.98,USD 48.00,tr_1"));
        assert!(contents.contains("Transaction Detail"));
        assert!(contents.contains("29.99 USD"));
    }

    #[test]
    fn test_dry_run_mode_line_and_empty_payouts() {
        let dir = tempdir().unwrap();

        let window =
            ReportingWindow::new(ts("2026-01-01 00:00:00"), ts("2026-01-08 00:00:00")).unwrap();
        let user_metrics = UserMetrics {
            total_users: 0,
            new_users: 0,
            total_referred_users: 0,
            new_referred_users: 0,
            new_referred_ratio: 0.0,
            total_referred_ratio: 0.0,
        };
        let subscription_metrics = SubscriptionMetrics {
            monthly: ProductClassMetrics::default(),
            yearly: ProductClassMetrics::default(),
            lifetime: ProductClassMetrics::default(),
        };

        let empty = HashMap::new();
        let data = ReportData {
            run_id: "run1",
            window: &window,
            user_metrics: &user_metrics,
            subscription_metrics: &subscription_metrics,
            payouts: &empty,
            transactions: &[],
            total_revenue: Decimal::ZERO,
            total_affiliate_payout: Decimal::ZERO,
            currency: "USD",
        };
        let path = dir.path().join("empty.csv");
        render_csv(&path, &data).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("No referral payouts calculated"));
        assert!(contents.contains("No referral-driven transactions in period"));

        let mut dry = create_test_payout();
        dry.dry_run = true;
        dry.transfer_id = None;
        dry.state = Some(PayoutState::DryRun);
        let mut payouts = HashMap::new();
        payouts.insert("ALICE10".to_string(), dry);
        let data = ReportData {
            payouts: &payouts,
            ..data
        };
        let path = dir.path().join("dry.csv");
        render_csv(&path, &data).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Dry-run (no transfers executed)"));
        assert!(contents.contains("dry-run"));
    }
}
