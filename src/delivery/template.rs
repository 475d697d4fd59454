//! Placeholder substitution for subject and body content.
//!
//! Only the fixed token set below is resolved; anything else that looks
//! like a token is left verbatim for the author to notice.

use crate::shared::models::Contact;

#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub company: String,
    pub job_title: String,
}

impl TemplateVars {
    pub fn from_contact(contact: &Contact) -> Self {
        Self {
            first_name: contact.first_name.clone().unwrap_or_default(),
            last_name: contact.last_name.clone().unwrap_or_default(),
            email: contact.email.clone(),
            company: contact.company.clone().unwrap_or_default(),
            job_title: contact.job_title.clone().unwrap_or_default(),
        }
    }

    pub fn full_name(&self) -> String {
        match (self.first_name.is_empty(), self.last_name.is_empty()) {
            (false, false) => format!("{} {}", self.first_name, self.last_name),
            (false, true) => self.first_name.clone(),
            (true, false) => self.last_name.clone(),
            (true, true) => String::new(),
        }
    }
}

pub fn render(template: &str, vars: &TemplateVars) -> String {
    template
        .replace("{{first_name}}", &vars.first_name)
        .replace("{{last_name}}", &vars.last_name)
        .replace("{{full_name}}", &vars.full_name())
        .replace("{{email}}", &vars.email)
        .replace("{{company}}", &vars.company)
        .replace("{{job_title}}", &vars.job_title)
}
