//! Backend relay for the agency website's contact form.
//!
//! A submission posted to `/api/contact` is rate limited per caller, validated, checked against
//! reCAPTCHA and then relayed as two plain-text emails: a lead notification for the operator and
//! an acknowledgement for the submitter.

pub mod config;
pub mod error;
pub mod handler;
pub mod mailer;
pub mod rate_limit;
pub mod recaptcha;
pub mod routes;
pub mod startup;
pub mod submission;
pub mod templates;
pub mod webhook;

pub use config::Settings;
pub use handler::ContactFormMessageHandler;
pub use startup::Application;
