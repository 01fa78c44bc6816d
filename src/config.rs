use std::env;

pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub frontend_origin: String,
    /// Optional HMAC-SHA256 secret for inbound webhook bodies. When unset the
    /// endpoint accepts unsigned deliveries (CRM automations cannot sign).
    pub webhook_secret: Option<String>,
    pub stripe: StripeSettings,
    pub crm: CrmSettings,
    pub messaging: MessagingSettings,
}

pub struct StripeSettings {
    pub secret_key: String,
    /// Redirect templates; `{deal_id}` is substituted per session.
    pub success_url: String,
    pub cancel_url: String,
}

pub struct CrmSettings {
    pub base_url: String,
    pub api_token: String,
    /// Custom-field key carrying the invoice/payment classifier on a deal.
    pub invoice_type_field: String,
    /// Custom-field key carrying the out-of-band cash pre-payment amount.
    pub cash_prepaid_field: String,
    /// Optional custom-field key the checkout URL is written back to.
    pub checkout_url_field: Option<String>,
    /// Classifier value that triggers payment-session orchestration.
    pub payment_trigger_value: String,
    /// Classifier value that triggers deletion processing.
    pub delete_trigger_value: String,
    /// Substring of a lost reason that routes a lost deal to the refund path.
    pub refund_reason_marker: String,
    pub request_timeout_secs: u64,
}

pub struct MessagingSettings {
    pub webhook_url: Option<String>,
    pub api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let frontend_origin = env::var("FRONTEND_ORIGIN").expect("FRONTEND_ORIGIN must be set");

        Config {
            database_url,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".into()),
            frontend_origin,
            webhook_secret: env::var("WEBHOOK_SECRET").ok().filter(|s| !s.is_empty()),
            stripe: StripeSettings {
                secret_key: env::var("STRIPE_SECRET_KEY").expect("STRIPE_SECRET_KEY must be set"),
                success_url: env::var("CHECKOUT_SUCCESS_URL")
                    .expect("CHECKOUT_SUCCESS_URL must be set"),
                cancel_url: env::var("CHECKOUT_CANCEL_URL")
                    .expect("CHECKOUT_CANCEL_URL must be set"),
            },
            crm: CrmSettings {
                base_url: env::var("CRM_BASE_URL").expect("CRM_BASE_URL must be set"),
                api_token: env::var("CRM_API_TOKEN").expect("CRM_API_TOKEN must be set"),
                invoice_type_field: env::var("CRM_INVOICE_TYPE_FIELD")
                    .unwrap_or_else(|_| "invoice_type".into()),
                cash_prepaid_field: env::var("CRM_CASH_PREPAID_FIELD")
                    .unwrap_or_else(|_| "cash_prepaid".into()),
                checkout_url_field: env::var("CRM_CHECKOUT_URL_FIELD")
                    .ok()
                    .filter(|s| !s.is_empty()),
                payment_trigger_value: env::var("CRM_PAYMENT_TRIGGER_VALUE")
                    .unwrap_or_else(|_| "auto_payment".into()),
                delete_trigger_value: env::var("CRM_DELETE_TRIGGER_VALUE")
                    .unwrap_or_else(|_| "delete".into()),
                refund_reason_marker: env::var("CRM_REFUND_REASON_MARKER")
                    .unwrap_or_else(|_| "refund".into()),
                request_timeout_secs: env::var("CRM_REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(10),
            },
            messaging: MessagingSettings {
                webhook_url: env::var("MESSAGING_WEBHOOK_URL").ok().filter(|s| !s.is_empty()),
                api_key: env::var("MESSAGING_API_KEY").ok().filter(|s| !s.is_empty()),
            },
        }
    }
}

#[cfg(test)]
impl Config {
    pub(crate) fn test_defaults() -> Self {
        Config {
            database_url: String::new(),
            bind_addr: "127.0.0.1:0".into(),
            frontend_origin: "https://app.example.com".into(),
            webhook_secret: None,
            stripe: StripeSettings {
                secret_key: "sk_test_stub".into(),
                success_url: "https://booking.example.com/payments/success?deal={deal_id}".into(),
                cancel_url: "https://booking.example.com/payments/cancel?deal={deal_id}".into(),
            },
            crm: CrmSettings {
                base_url: "https://crm.example.com/api/v1".into(),
                api_token: "token".into(),
                invoice_type_field: "invoice_type".into(),
                cash_prepaid_field: "cash_prepaid".into(),
                checkout_url_field: Some("checkout_url".into()),
                payment_trigger_value: "auto_payment".into(),
                delete_trigger_value: "delete".into(),
                refund_reason_marker: "refund".into(),
                request_timeout_secs: 10,
            },
            messaging: MessagingSettings {
                webhook_url: None,
                api_key: None,
            },
        }
    }
}
