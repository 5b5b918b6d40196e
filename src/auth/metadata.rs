//! SP metadata document.
//!
//! IdPs consume this XML to learn our entity ID, where to post responses, and
//! which certificate signs our AuthnRequests.

use super::SsoError;
use crate::config::SamlProviderConfig;

pub const ACS_PATH: &str = "/auth/saml/acs";
pub const METADATA_PATH: &str = "/auth/saml/metadata";
pub const DEFAULT_NAME_ID_FORMAT: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";

/// Public URLs identifying this service provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpEndpoints {
    pub entity_id: String,
    pub acs_url: String,
    pub metadata_url: String,
}

impl SpEndpoints {
    /// Derive the endpoints from `root_url`. The entity ID defaults to the
    /// metadata URL.
    pub fn from_config(config: &SamlProviderConfig) -> Result<Self, SsoError> {
        let root = url::Url::parse(&config.root_url).map_err(|e| {
            SsoError::Configuration(format!("Invalid root_url '{}': {}", config.root_url, e))
        })?;
        if !matches!(root.scheme(), "http" | "https") {
            return Err(SsoError::Configuration(format!(
                "root_url must use http or https, got '{}'",
                root.scheme()
            )));
        }

        let base = config.root_url.trim_end_matches('/');
        let metadata_url = format!("{}{}", base, METADATA_PATH);
        let acs_url = format!("{}{}", base, ACS_PATH);
        let entity_id = config
            .entity_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| metadata_url.clone());

        Ok(Self {
            entity_id,
            acs_url,
            metadata_url,
        })
    }
}

/// Render the SP `EntityDescriptor`.
///
/// `certificate_base64` is the DER certificate in base64 (PEM headers may be
/// present; they are stripped).
pub fn sp_metadata_xml(
    endpoints: &SpEndpoints,
    certificate_base64: &str,
    name_id_format: Option<&str>,
) -> String {
    let mut xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{}">
  <md:SPSSODescriptor AuthnRequestsSigned="true" WantAssertionsSigned="true" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">"#,
        xml_escape(&endpoints.entity_id)
    );

    xml.push_str(&format!(
        r#"
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data>
          <ds:X509Certificate>{}</ds:X509Certificate>
        </ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>"#,
        strip_pem_headers(certificate_base64)
    ));

    xml.push_str(&format!(
        r#"
    <md:NameIDFormat>{}</md:NameIDFormat>"#,
        xml_escape(name_id_format.unwrap_or(DEFAULT_NAME_ID_FORMAT))
    ));

    xml.push_str(&format!(
        r#"
    <md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="{}" index="0" isDefault="true"/>
  </md:SPSSODescriptor>"#,
        xml_escape(&endpoints.acs_url)
    ));

    // When the entity ID is the metadata URL the location is already implied.
    if endpoints.entity_id != endpoints.metadata_url {
        xml.push_str(&format!(
            r#"
  <md:AdditionalMetadataLocation namespace="urn:oasis:names:tc:SAML:2.0:metadata">{}</md:AdditionalMetadataLocation>"#,
            xml_escape(&endpoints.metadata_url)
        ));
    }

    xml.push_str(
        r#"
</md:EntityDescriptor>"#,
    );

    xml
}

/// Strip PEM armor and line breaks, leaving the bare base64 body.
pub fn strip_pem_headers(pem: &str) -> String {
    pem.lines()
        .filter(|line| !line.starts_with("-----BEGIN") && !line.starts_with("-----END"))
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("")
}

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use samael::metadata::EntityDescriptor;

    use super::*;

    fn endpoints(entity_id: Option<&str>) -> SpEndpoints {
        SpEndpoints::from_config(&SamlProviderConfig {
            root_url: "https://portal.example.com/".to_string(),
            entity_id: entity_id.map(str::to_string),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_endpoints_default_entity_id() {
        let endpoints = endpoints(None);
        assert_eq!(
            endpoints.metadata_url,
            "https://portal.example.com/auth/saml/metadata"
        );
        assert_eq!(
            endpoints.acs_url,
            "https://portal.example.com/auth/saml/acs"
        );
        assert_eq!(endpoints.entity_id, endpoints.metadata_url);
    }

    #[test]
    fn test_endpoints_explicit_entity_id() {
        let endpoints = endpoints(Some("urn:portcullis:sp"));
        assert_eq!(endpoints.entity_id, "urn:portcullis:sp");
    }

    #[test]
    fn test_endpoints_reject_bad_root_url() {
        for root_url in ["", "not a url", "ftp://portal.example.com"] {
            let config = SamlProviderConfig {
                root_url: root_url.to_string(),
                ..Default::default()
            };
            assert!(
                matches!(
                    SpEndpoints::from_config(&config),
                    Err(SsoError::Configuration(_))
                ),
                "root_url {root_url:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_strip_pem_headers() {
        let pem = "-----BEGIN CERTIFICATE-----\nMIIC\n  pDCC\n-----END CERTIFICATE-----\n";
        assert_eq!(strip_pem_headers(pem), "MIICpDCC");
    }

    #[test]
    fn test_metadata_round_trip() {
        let endpoints = endpoints(None);
        let xml = sp_metadata_xml(&endpoints, "MIICpDCC", None);

        let parsed: EntityDescriptor = samael::metadata::de::from_str(&xml).unwrap();
        assert_eq!(parsed.entity_id.as_deref(), Some(endpoints.entity_id.as_str()));

        let sp = &parsed.sp_sso_descriptors.as_ref().unwrap()[0];
        assert_eq!(sp.assertion_consumer_services[0].location, endpoints.acs_url);
        assert_eq!(
            sp.assertion_consumer_services[0].binding,
            samael::metadata::HTTP_POST_BINDING
        );
    }

    #[test]
    fn test_metadata_contents() {
        let endpoints = endpoints(None);
        let xml = sp_metadata_xml(
            &endpoints,
            "-----BEGIN CERTIFICATE-----\nMIICpDCC\n-----END CERTIFICATE-----",
            Some("urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress"),
        );

        assert!(xml.contains("<ds:X509Certificate>MIICpDCC</ds:X509Certificate>"));
        assert!(xml.contains("nameid-format:emailAddress</md:NameIDFormat>"));
        assert!(xml.contains("AuthnRequestsSigned=\"true\""));
        assert!(!xml.contains("BEGIN CERTIFICATE"));
        assert!(!xml.contains("AdditionalMetadataLocation"));
    }

    #[test]
    fn test_metadata_location_published_for_explicit_entity_id() {
        let endpoints = endpoints(Some("urn:portcullis:sp"));
        let xml = sp_metadata_xml(&endpoints, "MIICpDCC", None);

        assert!(xml.contains("entityID=\"urn:portcullis:sp\""));
        assert!(xml.contains(
            ">https://portal.example.com/auth/saml/metadata</md:AdditionalMetadataLocation>"
        ));
        assert!(xml.contains(DEFAULT_NAME_ID_FORMAT));
    }

    #[test]
    fn test_attribute_values_escaped() {
        let endpoints = SpEndpoints {
            entity_id: "https://sp.example.com/?a=1&b=\"2\"".to_string(),
            acs_url: "https://sp.example.com/acs".to_string(),
            metadata_url: "https://sp.example.com/metadata".to_string(),
        };
        let xml = sp_metadata_xml(&endpoints, "MIIC", None);
        assert!(xml.contains("entityID=\"https://sp.example.com/?a=1&amp;b=&quot;2&quot;\""));
    }
}
