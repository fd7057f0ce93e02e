use cadence_core::types::Contact;

/// Substitute contact fields into a subject or body template.
///
/// Without a contact the template is returned unchanged.
pub fn render(template: &str, contact: Option<&Contact>) -> String {
    let Some(contact) = contact else {
        return template.to_string();
    };

    let first = contact.first_name.clone().unwrap_or_default();
    let last = contact.last_name.clone().unwrap_or_default();
    let full = contact.full_name();
    let greeting_name = if full.is_empty() {
        "there".to_string()
    } else {
        full.clone()
    };
    let company = contact
        .company
        .clone()
        .unwrap_or_else(|| "your company".to_string());
    let title = contact.title.clone().unwrap_or_default();

    let vars: [(&[&str], &str); 7] = [
        (&["firstName", "first_name"], &first),
        (&["lastName", "last_name"], &last),
        (&["fullName", "full_name"], &full),
        (&["name"], &greeting_name),
        (&["company"], &company),
        (&["title"], &title),
        (&["email"], &contact.email),
    ];

    let mut out = template.to_string();
    for (names, value) in vars {
        for name in names {
            out = out.replace(&format!("{{{{{}}}}}", name), value);
        }
    }
    out
}
