//! Plain-text bodies for the two emails sent per submission.
//!
//! Rendering depends only on the submission and on the [`Branding`] fixed at startup, so the same
//! submission always renders to the same messages.

use crate::submission::ValidatedSubmission;
use serde::Serialize;
use std::{fmt::Display, str::FromStr};
use tinytemplate::{format_unescaped, TinyTemplate};

const NOTIFICATION_TEMPLATE_NAME: &str = "notification";
const ACKNOWLEDGEMENT_TEMPLATE_NAME: &str = "acknowledgement";
const STANDARD_NOTIFICATION_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/standard-notification.txt"
));
const STANDARD_ACKNOWLEDGEMENT_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/standard-acknowledgement.txt"
));
const LEAD_NOTIFICATION_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/lead-notification.txt"
));
const LEAD_ACKNOWLEDGEMENT_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/lead-acknowledgement.txt"
));

const NOT_SPECIFIED: &str = "Not specified";

/// Which pair of templates the relay renders, chosen once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TemplateStrategy {
    #[default]
    Standard,
    /// Scores the lead by budget and personalises the acknowledgement by the requested services.
    LeadScoring,
}

impl FromStr for TemplateStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(TemplateStrategy::Standard),
            "lead-scoring" | "lead_scoring" => Ok(TemplateStrategy::LeadScoring),
            other => Err(format!(
                "expected one of standard, lead-scoring but got {other}"
            )),
        }
    }
}

/// Static details about the agency which appear in every email.
#[derive(Debug, Clone, Serialize)]
pub struct Branding {
    pub agency_name: String,
    pub site_url: String,
    pub operator_name: String,
    pub operator_email: String,
    pub booking_url: String,
}

impl Branding {
    pub fn ramx_digital(operator_email: impl Into<String>, booking_url: impl Into<String>) -> Self {
        Self {
            agency_name: "RamXDigital".into(),
            site_url: "ramxdigital.com".into(),
            operator_name: "Cisco Ramos".into(),
            operator_email: operator_email.into(),
            booking_url: booking_url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub sender_name: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmails {
    /// Goes to the operator.
    pub notification: RenderedEmail,
    /// Goes to the submitter.
    pub acknowledgement: RenderedEmail,
}

#[derive(Debug, thiserror::Error)]
#[error("Error rendering {template} template: {description}")]
pub struct TemplateError {
    template: &'static str,
    description: String,
}

/// Lead quality derived from the selected budget range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BudgetTier {
    Premium,
    High,
    Medium,
    Entry,
    Unqualified,
}

impl BudgetTier {
    pub fn classify(budget: Option<&str>) -> Self {
        match budget {
            Some("15k-plus") => BudgetTier::Premium,
            Some("7k-15k") => BudgetTier::High,
            Some("3k-7k") => BudgetTier::Medium,
            Some("under-3k") => BudgetTier::Entry,
            _ => BudgetTier::Unqualified,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BudgetTier::Premium => "PREMIUM",
            BudgetTier::High => "HIGH",
            BudgetTier::Medium => "MEDIUM",
            BudgetTier::Entry => "ENTRY",
            BudgetTier::Unqualified => "UNQUALIFIED",
        }
    }

    fn acknowledgement_note(self) -> &'static str {
        match self {
            BudgetTier::Premium | BudgetTier::High => {
                "Given the scope of your project, our founder will prepare your proposal personally."
            }
            BudgetTier::Medium => {
                "We'll put together a tailored proposal based on your budget and goals."
            }
            BudgetTier::Entry => {
                "We'll include our starter packages, which are designed for budgets like yours."
            }
            BudgetTier::Unqualified => {
                "We'll suggest a few options at different price points so you can compare."
            }
        }
    }
}

impl Display for BudgetTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

fn budget_label(id: &str) -> &str {
    match id {
        "under-3k" => "Under GBP 3,000",
        "3k-7k" => "GBP 3,000 - 7,000",
        "7k-15k" => "GBP 7,000 - 15,000",
        "15k-plus" => "GBP 15,000+",
        "lets-discuss" => "Let's discuss",
        other => other,
    }
}

fn timeline_label(id: &str) -> &str {
    match id {
        "asap" => "ASAP (1-2 weeks)",
        "1-2-months" => "1-2 months",
        "3-6-months" => "3-6 months",
        "ongoing" => "Ongoing support",
        other => other,
    }
}

fn service_label(id: &str) -> &str {
    match id {
        "new-website" => "New website development",
        "redesign" => "Website redesign/refresh",
        "ecommerce" => "E-commerce store",
        "landing-pages" => "Landing pages",
        "maintenance" => "Website maintenance & care",
        "seo" => "SEO optimization & monitoring",
        "performance" => "Performance optimization",
        "other" => "Other",
        other => other,
    }
}

fn care_plan_label(id: &str) -> &str {
    match id {
        "basic" => "Care Basic (GBP 49/month)",
        "plus" => "Care Plus (GBP 99/month)",
        "premium" => "Care Premium (GBP 149/month)",
        "tell-me-more" => "Wants to hear more about care plans",
        other => other,
    }
}

#[derive(Serialize)]
struct Context<'a> {
    #[serde(flatten)]
    branding: &'a Branding,
    name: &'a str,
    first_name: &'a str,
    email: String,
    phone: &'a str,
    business: &'a str,
    industry: &'a str,
    current_website: &'a str,
    budget: &'a str,
    budget_tier: BudgetTier,
    tier_note: &'static str,
    timeline: Option<&'a str>,
    timeline_or_unspecified: &'a str,
    care_plan: &'a str,
    services: Vec<&'a str>,
    message: &'a str,
    goals: Option<&'a str>,
    target_audience: Option<&'a str>,
    design_inspiration: Option<&'a str>,
    special_requirements: Option<&'a str>,
    received: String,
    source: &'a str,
    ip: String,
}

impl<'a> Context<'a> {
    fn new(submission: &'a ValidatedSubmission<'a>, branding: &'a Branding) -> Self {
        let form = submission.form();
        let budget = submission.provided(&form.budget);
        let budget_tier = BudgetTier::classify(budget);
        let timeline = submission.provided(&form.timeline).map(timeline_label);
        Self {
            branding,
            name: submission.name,
            first_name: submission
                .name
                .split_whitespace()
                .next()
                .unwrap_or(submission.name),
            email: submission.email.to_string(),
            phone: submission.provided(&form.phone).unwrap_or(NOT_SPECIFIED),
            business: submission.provided(&form.business).unwrap_or(NOT_SPECIFIED),
            industry: submission.provided(&form.industry).unwrap_or(NOT_SPECIFIED),
            current_website: submission
                .provided(&form.current_website)
                .unwrap_or(NOT_SPECIFIED),
            budget: budget.map_or(NOT_SPECIFIED, budget_label),
            budget_tier,
            tier_note: budget_tier.acknowledgement_note(),
            timeline,
            timeline_or_unspecified: timeline.unwrap_or(NOT_SPECIFIED),
            care_plan: submission
                .provided(&form.care_plan)
                .map_or(NOT_SPECIFIED, care_plan_label),
            services: form
                .project_types
                .iter()
                .map(|id| service_label(id))
                .collect(),
            message: submission.message,
            goals: submission.provided(&form.goals),
            target_audience: submission.provided(&form.target_audience),
            design_inspiration: submission.provided(&form.design_inspiration),
            special_requirements: submission.provided(&form.special_requirements),
            received: submission
                .submission
                .timestamp
                .format("%d/%m/%Y, %H:%M:%S UTC")
                .to_string(),
            source: submission.provided(&form.source).unwrap_or("website"),
            ip: submission.submission.ip.to_string(),
        }
    }
}

impl TemplateStrategy {
    pub fn render(
        self,
        submission: &ValidatedSubmission,
        branding: &Branding,
    ) -> Result<RenderedEmails, TemplateError> {
        let context = Context::new(submission, branding);
        let (notification_template, acknowledgement_template) = match self {
            TemplateStrategy::Standard => (
                STANDARD_NOTIFICATION_TEMPLATE,
                STANDARD_ACKNOWLEDGEMENT_TEMPLATE,
            ),
            TemplateStrategy::LeadScoring => {
                (LEAD_NOTIFICATION_TEMPLATE, LEAD_ACKNOWLEDGEMENT_TEMPLATE)
            }
        };

        let mut tt = TinyTemplate::new();
        // Bodies are plain text, so HTML escaping would only mangle the submitter's words.
        tt.set_default_formatter(&format_unescaped);
        tt.add_template(NOTIFICATION_TEMPLATE_NAME, notification_template)
            .map_err(|e| TemplateError::new(NOTIFICATION_TEMPLATE_NAME, e))?;
        tt.add_template(ACKNOWLEDGEMENT_TEMPLATE_NAME, acknowledgement_template)
            .map_err(|e| TemplateError::new(ACKNOWLEDGEMENT_TEMPLATE_NAME, e))?;

        let notification_body = tt
            .render(NOTIFICATION_TEMPLATE_NAME, &context)
            .map_err(|e| TemplateError::new(NOTIFICATION_TEMPLATE_NAME, e))?;
        let acknowledgement_body = tt
            .render(ACKNOWLEDGEMENT_TEMPLATE_NAME, &context)
            .map_err(|e| TemplateError::new(ACKNOWLEDGEMENT_TEMPLATE_NAME, e))?;

        let notification_subject = match self {
            TemplateStrategy::Standard => format!("New enquiry from {}", submission.name),
            TemplateStrategy::LeadScoring => format!(
                "[{}] New enquiry from {}",
                context.budget_tier, submission.name
            ),
        };

        Ok(RenderedEmails {
            notification: RenderedEmail {
                sender_name: format!("{} Contact", branding.agency_name),
                subject: notification_subject,
                body: notification_body,
            },
            acknowledgement: RenderedEmail {
                sender_name: format!("{} - {}", branding.operator_name, branding.agency_name),
                subject: format!("We've received your message - {}", branding.agency_name),
                body: acknowledgement_body,
            },
        })
    }
}

impl TemplateError {
    fn new(template: &'static str, error: tinytemplate::error::Error) -> Self {
        Self {
            template,
            description: error.to_string(),
        }
    }
}
