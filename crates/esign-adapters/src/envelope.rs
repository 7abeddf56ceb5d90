//! SOAP envelope handling for the seal and enhancement RPCs.
//!
//! Requests carry a WS-Security UsernameToken header and a DSS-style body;
//! responses are parsed with a streaming XML reader rather than substring
//! matching, so namespace prefixes and element order don't matter.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use esign_core::gateway::GatewayError;

const SOAP_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
const DSS_NS: &str = "urn:oasis:names:tc:dss:1.0:core:schema";

const RESULT_MAJOR_SUCCESS: &str = "urn:oasis:names:tc:dss:1.0:resultmajor:Success";

fn xml_err(err: impl std::fmt::Display) -> GatewayError {
    GatewayError::Remote {
        code: "xml".into(),
        message: err.to_string(),
    }
}

/// A DSS request body: the operation element plus base64 document payloads.
pub struct RpcRequest<'a> {
    /// Operation element name, e.g. `SignRequest` or `VerifyRequest`.
    pub operation: &'a str,
    /// Value of the `Profile` attribute, selecting CAdES/PAdES behavior.
    pub profile: &'a str,
    /// (element name, raw bytes) pairs placed under `InputDocuments`.
    pub documents: &'a [(&'a str, &'a [u8])],
}

/// Build the full envelope for `request`, authenticated as `username`.
pub fn build_envelope(
    username: &str,
    password: &str,
    request: &RpcRequest<'_>,
) -> Result<String, GatewayError> {
    let mut writer = Writer::new(Vec::new());

    let mut envelope = BytesStart::new("soapenv:Envelope");
    envelope.push_attribute(("xmlns:soapenv", SOAP_NS));
    envelope.push_attribute(("xmlns:wsse", WSSE_NS));
    envelope.push_attribute(("xmlns:dss", DSS_NS));
    writer
        .write_event(Event::Start(envelope))
        .map_err(xml_err)?;

    writer
        .write_event(Event::Start(BytesStart::new("soapenv:Header")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("wsse:Security")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("wsse:UsernameToken")))
        .map_err(xml_err)?;
    write_text_element(&mut writer, "wsse:Username", username)?;
    write_text_element(&mut writer, "wsse:Password", password)?;
    writer
        .write_event(Event::End(BytesEnd::new("wsse:UsernameToken")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("wsse:Security")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("soapenv:Header")))
        .map_err(xml_err)?;

    writer
        .write_event(Event::Start(BytesStart::new("soapenv:Body")))
        .map_err(xml_err)?;
    let operation = format!("dss:{}", request.operation);
    let mut op = BytesStart::new(operation.as_str());
    op.push_attribute(("Profile", request.profile));
    writer.write_event(Event::Start(op)).map_err(xml_err)?;

    writer
        .write_event(Event::Start(BytesStart::new("dss:InputDocuments")))
        .map_err(xml_err)?;
    for (element, bytes) in request.documents {
        let name = format!("dss:{element}");
        writer
            .write_event(Event::Start(BytesStart::new(name.as_str())))
            .map_err(xml_err)?;
        write_text_element(&mut writer, "dss:Base64Data", &BASE64.encode(bytes))?;
        writer
            .write_event(Event::End(BytesEnd::new(name.as_str())))
            .map_err(xml_err)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("dss:InputDocuments")))
        .map_err(xml_err)?;

    writer
        .write_event(Event::End(BytesEnd::new(operation.as_str())))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("soapenv:Body")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("soapenv:Envelope")))
        .map_err(xml_err)?;

    String::from_utf8(writer.into_inner()).map_err(|err| GatewayError::Remote {
        code: "xml".into(),
        message: err.to_string(),
    })
}

fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    text: &str,
) -> Result<(), GatewayError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_err)?;
    Ok(())
}

/// Fields of interest pulled out of a DSS response envelope.
#[derive(Debug, Default, Clone)]
pub struct RpcResponse {
    pub result_major: Option<String>,
    pub result_minor: Option<String>,
    pub result_message: Option<String>,
    pub signature_b64: Option<String>,
    pub document_b64: Option<String>,
    pub signer_identity: Option<String>,
    pub signing_time: Option<DateTime<Utc>>,
}

impl RpcResponse {
    pub fn is_success(&self) -> bool {
        self.result_major.as_deref() == Some(RESULT_MAJOR_SUCCESS)
    }

    /// Decoded signature bytes, if the response carried any.
    pub fn signature_bytes(&self) -> Result<Option<Vec<u8>>, GatewayError> {
        decode_b64(self.signature_b64.as_deref())
    }

    pub fn document_bytes(&self) -> Result<Option<Vec<u8>>, GatewayError> {
        decode_b64(self.document_b64.as_deref())
    }
}

fn decode_b64(value: Option<&str>) -> Result<Option<Vec<u8>>, GatewayError> {
    value
        .map(|v| {
            BASE64
                .decode(v.trim())
                .map_err(|err| GatewayError::Remote {
                    code: "xml".into(),
                    message: format!("bad base64 payload: {err}"),
                })
        })
        .transpose()
}

/// Parse a response envelope, tolerating any namespace prefixes.
pub fn parse_envelope(xml: &str) -> Result<RpcResponse, GatewayError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut response = RpcResponse::default();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(start) => {
                current = Some(String::from_utf8_lossy(start.local_name().as_ref()).into_owned());
            }
            Event::Text(text) => {
                let value = text.unescape().map_err(xml_err)?.into_owned();
                match current.as_deref() {
                    Some("ResultMajor") => response.result_major = Some(value),
                    Some("ResultMinor") => response.result_minor = Some(value),
                    Some("ResultMessage") => response.result_message = Some(value),
                    Some("Base64Signature") => response.signature_b64 = Some(value),
                    Some("Base64Data") | Some("Base64Document") => {
                        response.document_b64 = Some(value)
                    }
                    Some("SignerIdentity") => response.signer_identity = Some(value),
                    Some("SigningTime") => {
                        response.signing_time = DateTime::parse_from_rfc3339(value.trim())
                            .ok()
                            .map(|t| t.with_timezone(&Utc));
                    }
                    _ => {}
                }
            }
            Event::End(_) => current = None,
            Event::Eof => break,
            _ => {}
        }
    }

    if response.result_major.is_none() {
        return Err(GatewayError::Remote {
            code: "xml".into(),
            message: "response envelope carried no ResultMajor".into(),
        });
    }
    Ok(response)
}

/// Operator-readable message for a verification ResultMinor code.
pub fn describe_minor(minor: Option<&str>) -> String {
    match minor {
        Some(m) if m.ends_with(":valid:signature:OnAllDocuments") => {
            "signature valid on all documents".into()
        }
        Some(m) if m.ends_with(":invalid:IncorrectSignature") => {
            "signature does not match the document".into()
        }
        Some(m) if m.contains(":certificate:") && m.contains("Expired") => {
            "signing certificate has expired".into()
        }
        Some(m) if m.contains(":certificate:") && m.contains("Revoked") => {
            "signing certificate has been revoked".into()
        }
        Some(m) => format!("verification reported: {m}"),
        None => "verification completed without detail".into(),
    }
}
