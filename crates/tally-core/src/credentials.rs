//! Vendor credential shapes
//!
//! Each vendor authenticates with its own set of fields. Credentials arrive as
//! JSON tagged by `vendor`, are validated per shape, and are turned into a
//! canonical [`CredentialRecord`] before being handed to the scraping
//! collaborator. Unknown vendor tags are rejected at the boundary.
//!
//! ```json
//! { "vendor": "isracard", "id": "123456789", "card6Digits": "123456", "password": "..." }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::Vendor;

/// Username + password login (most banks and card issuers)
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsernameLogin {
    pub username: String,
    pub password: String,
}

/// Hapoalim user code login
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCodeLogin {
    pub user_code: String,
    pub password: String,
}

/// National ID + password + account code (Discount group)
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdPasswordNumLogin {
    pub id: String,
    pub password: String,
    pub num: String,
}

/// Card holder login (Isracard, Amex)
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardHolderLogin {
    pub id: String,
    pub card6_digits: String,
    pub password: String,
}

/// Yahav login
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YahavLogin {
    pub username: String,
    pub national_id: String,
    pub password: String,
}

/// One Zero login with a long-term OTP token
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneZeroLogin {
    pub email: String,
    pub password: String,
    pub otp_long_term_token: String,
}

/// Credentials for one vendor, tagged by vendor id
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "vendor", rename_all = "snake_case")]
pub enum VendorCredentials {
    Hapoalim(UserCodeLogin),
    Leumi(UsernameLogin),
    Mizrahi(UsernameLogin),
    Discount(IdPasswordNumLogin),
    Mercantile(IdPasswordNumLogin),
    OtsarHahayal(UsernameLogin),
    Beinleumi(UsernameLogin),
    Massad(UsernameLogin),
    Union(UsernameLogin),
    Yahav(YahavLogin),
    OneZero(OneZeroLogin),
    Isracard(CardHolderLogin),
    Amex(CardHolderLogin),
    Max(UsernameLogin),
    VisaCal(UsernameLogin),
}

impl VendorCredentials {
    /// Parse credentials from their JSON form
    ///
    /// Unknown vendor tags and missing fields are validation errors.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Validation(format!("Invalid credentials: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn vendor(&self) -> Vendor {
        match self {
            Self::Hapoalim(_) => Vendor::Hapoalim,
            Self::Leumi(_) => Vendor::Leumi,
            Self::Mizrahi(_) => Vendor::Mizrahi,
            Self::Discount(_) => Vendor::Discount,
            Self::Mercantile(_) => Vendor::Mercantile,
            Self::OtsarHahayal(_) => Vendor::OtsarHahayal,
            Self::Beinleumi(_) => Vendor::Beinleumi,
            Self::Massad(_) => Vendor::Massad,
            Self::Union(_) => Vendor::Union,
            Self::Yahav(_) => Vendor::Yahav,
            Self::OneZero(_) => Vendor::OneZero,
            Self::Isracard(_) => Vendor::Isracard,
            Self::Amex(_) => Vendor::Amex,
            Self::Max(_) => Vendor::Max,
            Self::VisaCal(_) => Vendor::VisaCal,
        }
    }

    /// Validate the fields for this vendor's shape and build the canonical record
    pub fn validate(&self) -> Result<CredentialRecord> {
        let vendor = self.vendor();
        let mut record = CredentialRecord::new(vendor);

        match self {
            Self::Hapoalim(l) => {
                record.put("userCode", required(vendor, "userCode", &l.user_code)?);
                record.put("password", required(vendor, "password", &l.password)?);
            }
            Self::Leumi(l)
            | Self::Mizrahi(l)
            | Self::OtsarHahayal(l)
            | Self::Beinleumi(l)
            | Self::Massad(l)
            | Self::Union(l)
            | Self::Max(l)
            | Self::VisaCal(l) => {
                record.put("username", required(vendor, "username", &l.username)?);
                record.put("password", required(vendor, "password", &l.password)?);
            }
            Self::Discount(l) | Self::Mercantile(l) => {
                record.put("id", digits(vendor, "id", &l.id, None)?);
                record.put("password", required(vendor, "password", &l.password)?);
                record.put("num", required(vendor, "num", &l.num)?);
            }
            Self::Isracard(l) | Self::Amex(l) => {
                record.put("id", digits(vendor, "id", &l.id, None)?);
                record.put(
                    "card6Digits",
                    digits(vendor, "card6Digits", &l.card6_digits, Some(6))?,
                );
                record.put("password", required(vendor, "password", &l.password)?);
            }
            Self::Yahav(l) => {
                record.put("username", required(vendor, "username", &l.username)?);
                record.put(
                    "nationalID",
                    digits(vendor, "nationalId", &l.national_id, None)?,
                );
                record.put("password", required(vendor, "password", &l.password)?);
            }
            Self::OneZero(l) => {
                let email = required(vendor, "email", &l.email)?;
                if !email.contains('@') {
                    return Err(Error::Validation(format!(
                        "{}: email is not a valid address",
                        vendor
                    )));
                }
                record.put("email", email);
                record.put("password", required(vendor, "password", &l.password)?);
                record.put(
                    "otpLongTermToken",
                    required(vendor, "otpLongTermToken", &l.otp_long_term_token)?,
                );
            }
        }

        Ok(record)
    }
}

impl std::fmt::Debug for VendorCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorCredentials")
            .field("vendor", &self.vendor())
            .finish_non_exhaustive()
    }
}

fn required(vendor: Vendor, field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation(format!(
            "{}: missing required field '{}'",
            vendor, field
        )));
    }
    Ok(trimmed.to_string())
}

fn digits(vendor: Vendor, field: &str, value: &str, len: Option<usize>) -> Result<String> {
    let value = required(vendor, field, value)?;
    if !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Validation(format!(
            "{}: field '{}' must contain only digits",
            vendor, field
        )));
    }
    if let Some(len) = len {
        if value.len() != len {
            return Err(Error::Validation(format!(
                "{}: field '{}' must be exactly {} digits",
                vendor, field, len
            )));
        }
    }
    Ok(value)
}

/// Canonical, validated credential handed to the scraping collaborator
///
/// Serializes as a flat JSON object of the vendor's login fields.
#[derive(Clone, Serialize)]
pub struct CredentialRecord {
    #[serde(skip)]
    pub vendor: Vendor,
    #[serde(flatten)]
    fields: BTreeMap<String, String>,
}

impl CredentialRecord {
    fn new(vendor: Vendor) -> Self {
        Self {
            vendor,
            fields: BTreeMap::new(),
        }
    }

    fn put(&mut self, key: &str, value: String) {
        self.fields.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("CredentialRecord");
        s.field("vendor", &self.vendor);
        for key in self.fields.keys() {
            s.field(key, &"***");
        }
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_validate_username_login() {
        let creds =
            VendorCredentials::from_json(r#"{"vendor":"leumi","username":" bob ","password":"pw"}"#)
                .unwrap();
        assert_eq!(creds.vendor(), Vendor::Leumi);

        let record = creds.validate().unwrap();
        assert_eq!(record.get("username"), Some("bob"));
        assert_eq!(record.get("password"), Some("pw"));
    }

    #[test]
    fn test_card_holder_requires_six_digits() {
        let creds = VendorCredentials::from_json(
            r#"{"vendor":"isracard","id":"123456789","card6Digits":"12345","password":"pw"}"#,
        )
        .unwrap();
        assert!(matches!(creds.validate(), Err(Error::Validation(_))));

        let creds = VendorCredentials::from_json(
            r#"{"vendor":"amex","id":"123456789","card6Digits":"123456","password":"pw"}"#,
        )
        .unwrap();
        let record = creds.validate().unwrap();
        assert_eq!(record.vendor, Vendor::Amex);
        assert_eq!(record.get("card6Digits"), Some("123456"));
    }

    #[test]
    fn test_unknown_vendor_rejected() {
        let err = VendorCredentials::from_json(r#"{"vendor":"nosuchbank","username":"a"}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_missing_field_rejected() {
        let err = VendorCredentials::from_json(r#"{"vendor":"hapoalim","password":"pw"}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let creds =
            VendorCredentials::from_json(r#"{"vendor":"hapoalim","userCode":"  ","password":"pw"}"#)
                .unwrap();
        assert!(matches!(creds.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_one_zero_email_shape() {
        let creds = VendorCredentials::from_json(
            r#"{"vendor":"one_zero","email":"nope","password":"pw","otpLongTermToken":"t"}"#,
        )
        .unwrap();
        assert!(creds.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = VendorCredentials::from_json(
            r#"{"vendor":"max","username":"alice","password":"hunter2"}"#,
        )
        .unwrap();
        let record = creds.validate().unwrap();
        let shown = format!("{:?} {:?}", creds, record);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("max") || shown.contains("Max"));
    }

    #[test]
    fn test_record_serializes_flat() {
        let creds = VendorCredentials::from_json(
            r#"{"vendor":"discount","id":"0123","password":"pw","num":"ab12"}"#,
        )
        .unwrap();
        let json = serde_json::to_value(creds.validate().unwrap()).unwrap();
        assert_eq!(json["id"], "0123");
        assert_eq!(json["num"], "ab12");
        assert!(json.get("vendor").is_none());
    }
}
