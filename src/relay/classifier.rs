//! Payment classification for incoming notifications
//!
//! Two independent signals are computed from the raw event:
//! - `is_payment`: any payment keyword appears in title/text/big text
//! - `is_high_priority`: the source is a known wallet app, or the content
//!   mentions the priority brand. High priority events skip the payment
//!   heuristic downstream.

use crate::event::NotificationEvent;

/// Payment-related keywords (matched case-insensitively as substrings)
pub const PAYMENT_KEYWORDS: &[&str] = &[
    "pago",
    "pagaste",
    "recibiste",
    "payment",
    "paid",
    "deposito",
    "depósito",
    "yape",
    "transferencia",
    "dinero",
];

/// Packages that are always forwarded
pub const PRIORITY_PACKAGES: &[&str] = &["com.bcp.bo.wallet"];

/// Package name fragments that mark a priority source
pub const PRIORITY_PACKAGE_FRAGMENTS: &[&str] = &["yape", "bcp"];

/// Brand term that marks priority content
pub const PRIORITY_BRAND: &str = "yape";

/// Classification result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classification {
    pub is_payment: bool,
    pub is_high_priority: bool,
}

impl Classification {
    /// Whether the event should be forwarded given the `send_all` setting
    pub fn should_send(&self, send_all: bool) -> bool {
        self.is_high_priority || send_all || self.is_payment
    }
}

/// Classify a notification event
pub fn classify(event: &NotificationEvent) -> Classification {
    let content = event.joined_content().to_lowercase();
    let is_payment = PAYMENT_KEYWORDS.iter().any(|k| content.contains(k));

    Classification {
        is_payment,
        is_high_priority: is_priority_source(&event.package) || mentions_brand(event),
    }
}

fn is_priority_source(package: &str) -> bool {
    PRIORITY_PACKAGES.contains(&package)
        || PRIORITY_PACKAGE_FRAGMENTS.iter().any(|f| package.contains(f))
}

fn mentions_brand(event: &NotificationEvent) -> bool {
    [&event.title, &event.text, &event.big_text]
        .iter()
        .any(|field| field.to_lowercase().contains(PRIORITY_BRAND))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_keyword_no_priority() {
        let event = NotificationEvent::new("com.whatsapp", "Mamá", "¿Vienes a cenar?");
        let c = classify(&event);
        assert!(!c.is_payment);
        assert!(!c.is_high_priority);
    }

    #[test]
    fn test_payment_keyword_case_insensitive() {
        let event = NotificationEvent::new("com.bank", "PAGO RECIBIDO", "");
        assert!(classify(&event).is_payment);

        let event = NotificationEvent::new("com.bank", "", "").with_big_text("Depósito de S/ 20");
        assert!(classify(&event).is_payment);
    }

    #[test]
    fn test_priority_brand_in_content() {
        let event = NotificationEvent::new("com.other", "Aviso", "Te enviaron un YAPE");
        let c = classify(&event);
        assert!(c.is_high_priority);
    }

    #[test]
    fn test_priority_brand_without_keyword_list_match() {
        // "yape" inside a longer word still counts for priority
        let event = NotificationEvent::new("com.other", "", "").with_big_text("notificacionyapex");
        assert!(classify(&event).is_high_priority);
    }

    #[test]
    fn test_priority_package() {
        let c = classify(&NotificationEvent::new("com.bcp.bo.wallet", "Hola", "Mensaje"));
        assert!(c.is_high_priority);
        assert!(!c.is_payment);

        assert!(classify(&NotificationEvent::new("com.yape.app", "", "")).is_high_priority);
        assert!(classify(&NotificationEvent::new("pe.com.bcp.mobile", "", "")).is_high_priority);
    }

    #[test]
    fn test_should_send_decision() {
        let none = Classification::default();
        assert!(!none.should_send(false));
        assert!(none.should_send(true));

        let payment = Classification { is_payment: true, is_high_priority: false };
        assert!(payment.should_send(false));

        let priority = Classification { is_payment: false, is_high_priority: true };
        assert!(priority.should_send(false));
    }
}
