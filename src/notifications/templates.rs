// Built-in dunning notice templates, one per stage
//
// Placeholders use `{name}` and are filled by plain substitution:
// company_name, case_number, due_date, street_address, nip, debt_amount,
// currency, schedule and the creditor_* contact block.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::error::TemplateError;
use crate::ledger::models::{CaseRecord, Stage};
use crate::stage_engine::catalog::StageCatalog;

/// Creditor identity printed on every notice
#[derive(Debug, Clone, Default)]
pub struct CreditorDetails {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub bank_account: String,
}

#[derive(Debug, Clone)]
pub struct StageTemplate {
    pub subject: String,
    pub body_html: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body_html: String,
}

const AMOUNT_STATEMENT: &str = r#"<p><strong>Statement of the amount due:</strong><br>
<strong>{company_name}</strong><br>
<strong>{street_address}</strong><br>
<strong>Tax ID: {nip}</strong><br>
Case number: <strong>{case_number}</strong><br>
Amount due: <strong>{debt_amount} {currency}</strong><br>
Pay to account: {creditor_bank_account}</p>

<p><strong>Contact the creditor to clarify the matter:</strong><br>
Phone: {creditor_phone}<br>
E-mail: {creditor_email}</p>
"#;

const IGNORE_IF_PAID: &str =
    "If the amount has already been paid, please disregard this message.";

/// Stage-keyed template set
#[derive(Debug, Clone)]
pub struct MessageTemplates {
    creditor: CreditorDetails,
    templates: HashMap<Stage, StageTemplate>,
}

impl MessageTemplates {
    pub fn builtin(creditor: CreditorDetails) -> Self {
        let mut templates = HashMap::new();

        templates.insert(
            Stage::Reminder,
            StageTemplate {
                subject: "Reminder of the upcoming payment due date for {case_number}".to_string(),
                body_html: format!(
                    "<p><strong>{{company_name}},</strong><br><br>\n\
                     The payment term for invoice <strong>{{case_number}}</strong> ends on \
                     <strong>{{due_date}}</strong>. Please settle the amount due to \
                     <strong>{{creditor_name}}</strong> on time.<br><br>\n{}</p>\n\n{}",
                    IGNORE_IF_PAID, AMOUNT_STATEMENT
                ),
            },
        );

        templates.insert(
            Stage::Overdue,
            StageTemplate {
                subject: "Payment due date passed for {case_number}".to_string(),
                body_html: format!(
                    "<p><strong>{{company_name}},</strong><br><br>\n\
                     The payment term for invoice <strong>{{case_number}}</strong> passed on \
                     <strong>{{due_date}}</strong>. Please settle the amount due to \
                     <strong>{{creditor_name}}</strong> as soon as possible.<br><br>\n{}</p>\n\n{}\n\
                     <p><strong>Next steps if the invoice stays unpaid:</strong><br>\n{{schedule}}</p>\n",
                    IGNORE_IF_PAID, AMOUNT_STATEMENT
                ),
            },
        );

        templates.insert(
            Stage::Demand,
            StageTemplate {
                subject: "Demand for payment {case_number}".to_string(),
                body_html: format!(
                    "<p><strong>{{company_name}},</strong><br><br>\n\
                     Your creditor <strong>{{creditor_name}}</strong> demands payment of \
                     <strong>{{debt_amount}} {{currency}}</strong> in case \
                     <strong>{{case_number}}</strong>, due since <strong>{{due_date}}</strong>.<br><br>\n{}</p>\n\n{}\n\
                     <p><strong>Next steps if the invoice stays unpaid:</strong><br>\n{{schedule}}</p>\n",
                    IGNORE_IF_PAID, AMOUNT_STATEMENT
                ),
            },
        );

        templates.insert(
            Stage::PreEscalation,
            StageTemplate {
                subject: "Intent to refer case {case_number} to external collection".to_string(),
                body_html: format!(
                    "<p><strong>{{company_name}},</strong><br><br>\n\
                     Case <strong>{{case_number}}</strong> will be referred to an external collection \
                     agency and published on the debt exchange. To settle the debt, contact \
                     <strong>{{creditor_name}}</strong>.<br><br>\n{}</p>\n\n{}\n\
                     <p><strong>Next steps if the invoice stays unpaid:</strong><br>\n{{schedule}}</p>\n",
                    IGNORE_IF_PAID, AMOUNT_STATEMENT
                ),
            },
        );

        templates.insert(
            Stage::Escalated,
            StageTemplate {
                subject: "Case {case_number} referred to external collection".to_string(),
                body_html: format!(
                    "<p><strong>{{company_name}},</strong><br><br>\n\
                     Your case for payment of <strong>{{debt_amount}} {{currency}}</strong> owed to \
                     <strong>{{creditor_name}}</strong> has been referred to an external collection \
                     agency. The case can still be withdrawn by agreement with the creditor.<br><br>\n{}</p>\n\n{}",
                    IGNORE_IF_PAID, AMOUNT_STATEMENT
                ),
            },
        );

        Self { creditor, templates }
    }

    /// Replace or drop the template of one stage
    pub fn set(&mut self, stage: Stage, template: Option<StageTemplate>) {
        match template {
            Some(template) => {
                self.templates.insert(stage, template);
            }
            None => {
                self.templates.remove(&stage);
            }
        }
    }

    pub fn render(
        &self,
        stage: Stage,
        record: &CaseRecord,
        catalog: &StageCatalog,
    ) -> Result<RenderedMessage, TemplateError> {
        let template = self
            .templates
            .get(&stage)
            .ok_or(TemplateError::MissingTemplate(stage))?;

        let due_date = record
            .invoice
            .due_date
            .ok_or_else(|| TemplateError::MissingDueDate(record.invoice.invoice_number.clone()))?;

        let values = self.placeholders(stage, record, due_date, catalog);

        Ok(RenderedMessage {
            subject: fill(&template.subject, &values),
            body_html: fill(&template.body_html, &values),
        })
    }

    fn placeholders(
        &self,
        stage: Stage,
        record: &CaseRecord,
        due_date: NaiveDate,
        catalog: &StageCatalog,
    ) -> Vec<(&'static str, String)> {
        let schedule = catalog
            .later_stages(stage, due_date)
            .into_iter()
            .map(|(later, date)| format!("{} - {}.", date.format("%Y-%m-%d"), later.display_name()))
            .collect::<Vec<_>>()
            .join("<br>\n");

        vec![
            ("company_name", escape_html(record.case.client_company_name.as_deref().unwrap_or_default())),
            ("case_number", escape_html(&record.case.case_number)),
            ("due_date", due_date.format("%Y-%m-%d").to_string()),
            ("street_address", escape_html(record.invoice.client_address.as_deref().unwrap_or_default())),
            ("nip", escape_html(record.case.client_tax_id.as_deref().unwrap_or_default())),
            ("debt_amount", format_amount(record.invoice.remaining_amount)),
            ("currency", escape_html(&record.invoice.currency)),
            ("schedule", schedule),
            ("creditor_name", escape_html(&self.creditor.name)),
            ("creditor_email", escape_html(&self.creditor.email)),
            ("creditor_phone", escape_html(&self.creditor.phone)),
            ("creditor_bank_account", escape_html(&self.creditor.bank_account)),
        ]
    }
}

/// Minor units to a two-decimal amount, e.g. 123450 -> "1234.50"
pub fn format_amount(minor_units: i64) -> String {
    Decimal::new(minor_units, 2).to_string()
}

fn fill(template: &str, values: &[(&'static str, String)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
