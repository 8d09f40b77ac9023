//! Response schemas for the endpoint operations.
//!
//! Decoding is forward compatible: unknown fields are ignored, malformed
//! dates become `None` and malformed collections decode as empty.

use chrono::{DateTime, Utc};
use purchases_core::date::lenient;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferingsResponse {
    #[serde(default)]
    pub current_offering_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::default_on_error")]
    pub offerings: Vec<Offering>,
}

impl OfferingsResponse {
    pub fn current(&self) -> Option<&Offering> {
        let id = self.current_offering_id.as_deref()?;
        self.offerings.iter().find(|o| o.identifier == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offering {
    pub identifier: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "lenient::default_on_error")]
    pub packages: Vec<Package>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub identifier: String,
    pub platform_product_identifier: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerInfoResponse {
    #[serde(default, deserialize_with = "lenient::optional_date")]
    pub request_date: Option<DateTime<Utc>>,
    pub subscriber: Subscriber,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    #[serde(default)]
    pub original_app_user_id: String,
    #[serde(default, deserialize_with = "lenient::optional_date")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::optional_date")]
    pub original_purchase_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub management_url: Option<String>,
    #[serde(default, deserialize_with = "lenient::default_on_error")]
    pub entitlements: BTreeMap<String, Entitlement>,
    #[serde(default, deserialize_with = "lenient::default_on_error")]
    pub subscriptions: BTreeMap<String, Subscription>,
}

impl Subscriber {
    /// Entitlements whose expiry is unset or after `now`.
    pub fn active_entitlements(&self, now: DateTime<Utc>) -> Vec<&str> {
        self.entitlements
            .iter()
            .filter(|(_, e)| e.expires_date.map_or(true, |expires| expires > now))
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entitlement {
    #[serde(default)]
    pub product_identifier: String,
    #[serde(default, deserialize_with = "lenient::optional_date")]
    pub expires_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::optional_date")]
    pub purchase_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default, deserialize_with = "lenient::optional_date")]
    pub expires_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::optional_date")]
    pub purchase_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::optional_date")]
    pub original_purchase_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub period_type: Option<String>,
    #[serde(default)]
    pub store: Option<String>,
    #[serde(default)]
    pub is_sandbox: bool,
    #[serde(default, deserialize_with = "lenient::optional_date")]
    pub unsubscribe_detected_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::optional_date")]
    pub billing_issues_detected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductsEntitlementsResponse {
    #[serde(default, deserialize_with = "lenient::default_on_error")]
    pub products: Vec<ProductEntitlementMapping>,
}

impl ProductsEntitlementsResponse {
    /// Product id -> entitlement ids.
    pub fn mapping(&self) -> BTreeMap<&str, &[String]> {
        self.products
            .iter()
            .map(|p| (p.id.as_str(), p.entitlements.as_slice()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductEntitlementMapping {
    pub id: String,
    #[serde(default)]
    pub entitlements: Vec<String>,
}
