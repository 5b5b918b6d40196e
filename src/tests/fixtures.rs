//! Shared builders for IdP metadata, SAML responses, and key material.

use std::sync::OnceLock;

use base64::{Engine, engine::general_purpose::STANDARD};

use crate::auth::KeyMaterial;

pub const IDP_ENTITY_ID: &str = "https://idp.example.com/metadata";
pub const SP_ROOT_URL: &str = "https://portal.example.com";

/// One RSA key pair per test binary; generation is slow.
pub fn test_key_material() -> &'static KeyMaterial {
    static MATERIAL: OnceLock<KeyMaterial> = OnceLock::new();
    MATERIAL.get_or_init(|| {
        KeyMaterial::generate("test-idp.example.com").expect("generate test key material")
    })
}

/// A second, unrelated key pair for "untrusted signer" cases.
pub fn untrusted_key_material() -> &'static KeyMaterial {
    static MATERIAL: OnceLock<KeyMaterial> = OnceLock::new();
    MATERIAL.get_or_init(|| {
        KeyMaterial::generate("attacker.example.com").expect("generate test key material")
    })
}

/// IdP metadata with one signing certificate, an HTTP-POST SSO endpoint, and
/// optionally an HTTP-Redirect one.
pub fn idp_metadata_xml(certificate_base64: &str, redirect_sso_url: Option<&str>) -> String {
    let redirect = redirect_sso_url
        .map(|url| {
            format!(
                r#"
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="{}"/>"#,
                url
            )
        })
        .unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{}">
  <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data>
          <ds:X509Certificate>{}</ds:X509Certificate>
        </ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>
    <md:NameIDFormat>urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified</md:NameIDFormat>
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="https://idp.example.com/sso/post"/>{}
  </md:IDPSSODescriptor>
</md:EntityDescriptor>"#,
        IDP_ENTITY_ID, certificate_base64, redirect
    )
}

/// A `ds:Signature` element embedding `certificate_base64` whose digest and
/// signature values are garbage.
pub fn signature_xml(certificate_base64: &str) -> String {
    format!(
        r##"<ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
    <ds:SignedInfo>
      <ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/>
      <ds:SignatureMethod Algorithm="http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"/>
      <ds:Reference URI="#_resp1">
        <ds:Transforms>
          <ds:Transform Algorithm="http://www.w3.org/2000/09/xmldsig#enveloped-signature"/>
          <ds:Transform Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/>
        </ds:Transforms>
        <ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/>
        <ds:DigestValue>AAAA</ds:DigestValue>
      </ds:Reference>
    </ds:SignedInfo>
    <ds:SignatureValue>AAAA</ds:SignatureValue>
    <ds:KeyInfo>
      <ds:X509Data>
        <ds:X509Certificate>{}</ds:X509Certificate>
      </ds:X509Data>
    </ds:KeyInfo>
  </ds:Signature>"##,
        certificate_base64
    )
}

/// Options for [`response_xml`].
pub struct ResponseSpec<'a> {
    pub in_response_to: &'a str,
    pub destination: &'a str,
    pub audience: &'a str,
    /// Optional `ds:Signature` element placed after the response issuer.
    pub signature: Option<String>,
    pub attributes: &'a [(&'a str, &'a [&'a str])],
}

/// A SAML `Response` with one assertion for `jdoe`.
pub fn response_xml(spec: &ResponseSpec<'_>) -> String {
    let now = chrono::Utc::now();
    let issue_instant = now.format("%Y-%m-%dT%H:%M:%SZ");
    let not_before = (now - chrono::Duration::minutes(5)).format("%Y-%m-%dT%H:%M:%SZ");
    let not_after = (now + chrono::Duration::minutes(5)).format("%Y-%m-%dT%H:%M:%SZ");

    let attributes: String = spec
        .attributes
        .iter()
        .map(|(name, values)| {
            let values: String = values
                .iter()
                .map(|v| format!("<saml:AttributeValue>{}</saml:AttributeValue>", v))
                .collect();
            format!(r#"<saml:Attribute Name="{}">{}</saml:Attribute>"#, name, values)
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_resp1" Version="2.0" IssueInstant="{issue_instant}" Destination="{destination}" InResponseTo="{irt}">
  <saml:Issuer>{idp}</saml:Issuer>
  {signature}
  <samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>
  <saml:Assertion ID="_assert1" Version="2.0" IssueInstant="{issue_instant}">
    <saml:Issuer>{idp}</saml:Issuer>
    <saml:Subject>
      <saml:NameID Format="urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified">jdoe</saml:NameID>
      <saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer">
        <saml:SubjectConfirmationData InResponseTo="{irt}" NotOnOrAfter="{not_after}" Recipient="{destination}"/>
      </saml:SubjectConfirmation>
    </saml:Subject>
    <saml:Conditions NotBefore="{not_before}" NotOnOrAfter="{not_after}">
      <saml:AudienceRestriction><saml:Audience>{audience}</saml:Audience></saml:AudienceRestriction>
    </saml:Conditions>
    <saml:AuthnStatement AuthnInstant="{issue_instant}" SessionIndex="_session1">
      <saml:AuthnContext><saml:AuthnContextClassRef>urn:oasis:names:tc:SAML:2.0:ac:classes:Password</saml:AuthnContextClassRef></saml:AuthnContext>
    </saml:AuthnStatement>
    <saml:AttributeStatement>{attributes}</saml:AttributeStatement>
  </saml:Assertion>
</samlp:Response>"#,
        issue_instant = issue_instant,
        destination = spec.destination,
        irt = spec.in_response_to,
        idp = IDP_ENTITY_ID,
        signature = spec.signature.as_deref().unwrap_or_default(),
        not_before = not_before,
        not_after = not_after,
        audience = spec.audience,
        attributes = attributes,
    )
}

pub fn encode(xml: &str) -> String {
    STANDARD.encode(xml.as_bytes())
}

/// A response for `jdoe` answering `in_response_to`, with an assertion signed
/// by [`test_key_material`] and addressed to [`SP_ROOT_URL`].
#[cfg(feature = "xmlsec")]
pub fn signed_response_xml(in_response_to: &str, attributes: &[(&str, &str)]) -> String {
    use samael::{
        crypto::CertificateDer,
        idp::{
            IdentityProvider, response_builder::ResponseAttribute,
            sp_extractor::RequiredAttribute,
        },
        traits::ToXml,
    };

    use crate::auth::metadata::{ACS_PATH, METADATA_PATH};

    let material = test_key_material();
    let key_der = material
        .private_key()
        .rsa()
        .and_then(|rsa| rsa.private_key_to_der())
        .expect("export test key");
    let cert_der =
        CertificateDer::from(material.certificate().to_der().expect("export test cert"));
    let idp = IdentityProvider::from_rsa_private_key_der(&key_der).expect("load test IdP key");

    let attributes: Vec<ResponseAttribute> = attributes
        .iter()
        .map(|&(name, value)| ResponseAttribute {
            required_attribute: RequiredAttribute {
                name: name.to_string(),
                format: Some("urn:oasis:names:tc:SAML:2.0:attrname-format:basic".into()),
            },
            value,
        })
        .collect();

    idp.sign_authn_response(
        &cert_der,
        "jdoe",
        &format!("{}{}", SP_ROOT_URL, METADATA_PATH),
        &format!("{}{}", SP_ROOT_URL, ACS_PATH),
        IDP_ENTITY_ID,
        in_response_to,
        &attributes,
    )
    .expect("sign test response")
    .to_string()
    .expect("serialize test response")
}
