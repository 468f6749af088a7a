//! Route 53 REST client (API version 2013-04-01).
//!
//! Zones are addressed by name; the client resolves the hosted-zone id on
//! each call. Record names are normalized with [`berth_types::normalize_dns_name`]
//! so callers never see trailing dots or `\052` wildcard escapes.

use std::env;

use berth_types::{DnsRecord, RecordType, normalize_dns_name};
use chrono::Utc;
use quick_xml::escape::escape;
use reqwest::{Method, Url, header};
use serde::Deserialize;
use tracing::{debug, info};

use crate::sigv4::{self, SigningParams};
use crate::{ApiError, build_http_client, validate_base_url};

pub const DEFAULT_ENDPOINT: &str = "https://route53.amazonaws.com";
/// Overrides the API endpoint (localhost is accepted for testing).
pub const ENDPOINT_ENV_VAR: &str = "ROUTE53_ENDPOINT";
const ALLOWED_DOMAINS: &[&str] = &["amazonaws.com"];
const API_VERSION: &str = "2013-04-01";
const SIGNING_REGION: &str = "us-east-1";
const SIGNING_SERVICE: &str = "route53";
const SERVICE: &str = "Route 53";
const XML_NAMESPACE: &str = "https://route53.amazonaws.com/doc/2013-04-01/";

/// Static AWS credentials.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Route53Client {
    endpoint: Url,
    http: reqwest::Client,
    credentials: AwsCredentials,
}

impl Route53Client {
    /// Construct a client, honoring `ROUTE53_ENDPOINT`.
    pub fn new(credentials: AwsCredentials) -> Result<Self, ApiError> {
        let endpoint = env::var(ENDPOINT_ENV_VAR).unwrap_or_else(|_| DEFAULT_ENDPOINT.into());
        Self::with_endpoint(credentials, &endpoint)
    }

    pub fn with_endpoint(credentials: AwsCredentials, endpoint: &str) -> Result<Self, ApiError> {
        if credentials.access_key_id.trim().is_empty() {
            return Err(ApiError::MissingCredential("AWS access key id".into()));
        }
        if credentials.secret_access_key.trim().is_empty() {
            return Err(ApiError::MissingCredential("AWS secret access key".into()));
        }
        let endpoint = validate_base_url(endpoint, ALLOWED_DOMAINS)?;
        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/xml"));
        Ok(Self {
            endpoint,
            http: build_http_client(default_headers)?,
            credentials,
        })
    }

    /// Resolve the hosted-zone id (without the `/hostedzone/` prefix) for `zone`.
    pub async fn hosted_zone_id(&self, zone: &str) -> Result<Option<String>, ApiError> {
        let wanted = normalize_dns_name(zone);
        let dns_name = format!("{wanted}.");
        let body = self
            .send(
                Method::GET,
                &format!("/{API_VERSION}/hostedzonesbyname"),
                &[("dnsname", dns_name.as_str()), ("maxitems", "1")],
                None,
            )
            .await?;
        let response: ListHostedZonesByNameResponse = decode(&body)?;
        Ok(response
            .hosted_zones
            .items
            .into_iter()
            .find(|hosted| normalize_dns_name(&hosted.name) == wanted)
            .map(|hosted| hosted.id.trim_start_matches("/hostedzone/").to_string()))
    }

    async fn require_zone_id(&self, zone: &str) -> Result<String, ApiError> {
        self.hosted_zone_id(zone)
            .await?
            .ok_or_else(|| ApiError::Unexpected(format!("no Route 53 hosted zone named '{zone}'")))
    }

    /// Record sets in `zone` whose name and type match exactly.
    pub async fn get_records(&self, zone: &str, name: &str, record_type: RecordType) -> Result<Vec<DnsRecord>, ApiError> {
        let zone_id = self.require_zone_id(zone).await?;
        let start_name = format!("{}.", normalize_dns_name(name));
        let body = self
            .send(
                Method::GET,
                &format!("/{API_VERSION}/hostedzone/{zone_id}/rrset"),
                &[("name", start_name.as_str()), ("type", record_type.as_str()), ("maxitems", "100")],
                None,
            )
            .await?;
        let response: ListResourceRecordSetsResponse = decode(&body)?;
        let records = matching_records(response, name, record_type);
        debug!(%zone, %name, %record_type, count = records.len(), "listed Route 53 record sets");
        Ok(records)
    }

    /// Create `record` in `zone`; `overwrite` selects `UPSERT` over `CREATE`.
    pub async fn create_record(&self, zone: &str, record: &DnsRecord, overwrite: bool) -> Result<String, ApiError> {
        let zone_id = self.require_zone_id(zone).await?;
        let payload = change_batch_xml(overwrite, record);
        let body = self
            .send(
                Method::POST,
                &format!("/{API_VERSION}/hostedzone/{zone_id}/rrset/"),
                &[],
                Some(payload),
            )
            .await?;
        let response: ChangeResourceRecordSetsResponse = decode(&body)?;
        info!(
            %zone,
            name = %record.name,
            record_type = %record.record_type,
            change_id = %response.change_info.id,
            status = %response.change_info.status,
            "submitted Route 53 change"
        );
        Ok(response.change_info.id)
    }

    async fn send(&self, method: Method, path: &str, query: &[(&str, &str)], payload: Option<String>) -> Result<String, ApiError> {
        let mut url = self
            .endpoint
            .join(path)
            .map_err(|e| ApiError::Unexpected(format!("invalid Route 53 path '{path}': {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }

        let body = payload.unwrap_or_default();
        let signed = sigv4::sign(
            method.as_str(),
            &url,
            &[],
            body.as_bytes(),
            &SigningParams {
                access_key_id: &self.credentials.access_key_id,
                secret_access_key: &self.credentials.secret_access_key,
                session_token: self.credentials.session_token.as_deref(),
                region: SIGNING_REGION,
                service: SIGNING_SERVICE,
                timestamp: Utc::now(),
            },
        );
        debug!(%method, url = %url, "sending Route 53 request");

        let mut request = self
            .http
            .request(method, url)
            .header("x-amz-date", signed.amz_date)
            .header(header::AUTHORIZATION, signed.authorization);
        if let Some(token) = signed.security_token {
            request = request.header("x-amz-security-token", token);
        }
        if !body.is_empty() {
            request = request.header(header::CONTENT_TYPE, "application/xml").body(body);
        }

        let response = request.send().await.map_err(|source| ApiError::Transport { service: SERVICE, source })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| ApiError::Transport { service: SERVICE, source })?;
        if !status.is_success() {
            return Err(ApiError::Status {
                service: SERVICE,
                status: status.as_u16(),
                message: error_message(&text),
            });
        }
        Ok(text)
    }
}

fn decode<'de, T: Deserialize<'de>>(body: &'de str) -> Result<T, ApiError> {
    quick_xml::de::from_str(body).map_err(|e| ApiError::Decode {
        service: SERVICE,
        message: e.to_string(),
    })
}

fn matching_records(response: ListResourceRecordSetsResponse, name: &str, record_type: RecordType) -> Vec<DnsRecord> {
    let wanted = normalize_dns_name(name);
    response
        .resource_record_sets
        .items
        .into_iter()
        .filter(|set| normalize_dns_name(&set.name) == wanted && set.record_type == record_type.as_str())
        .map(|set| DnsRecord {
            name: normalize_dns_name(&set.name),
            record_type,
            values: set.resource_records.items.into_iter().map(|record| record.value).collect(),
            ttl: set.ttl.unwrap_or_default(),
        })
        .collect()
}

fn change_batch_xml(overwrite: bool, record: &DnsRecord) -> String {
    let action = if overwrite { "UPSERT" } else { "CREATE" };
    let values: String = record
        .values
        .iter()
        .map(|value| format!("<ResourceRecord><Value>{}</Value></ResourceRecord>", escape(value.as_str())))
        .collect();
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<ChangeResourceRecordSetsRequest xmlns="{namespace}">"#,
            "<ChangeBatch><Comment>managed by berth</Comment><Changes><Change>",
            "<Action>{action}</Action>",
            "<ResourceRecordSet><Name>{name}.</Name><Type>{record_type}</Type><TTL>{ttl}</TTL>",
            "<ResourceRecords>{values}</ResourceRecords>",
            "</ResourceRecordSet></Change></Changes></ChangeBatch>",
            "</ChangeResourceRecordSetsRequest>"
        ),
        namespace = XML_NAMESPACE,
        action = action,
        name = escape(normalize_dns_name(&record.name).as_str()),
        record_type = record.record_type.as_str(),
        ttl = record.ttl,
        values = values,
    )
}

fn error_message(body: &str) -> String {
    quick_xml::de::from_str::<ErrorResponse>(body)
        .map(|response| format!("{}: {}", response.error.code, response.error.message))
        .unwrap_or_else(|_| berth_util::redact_sensitive(body.trim()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListHostedZonesByNameResponse {
    #[serde(default)]
    hosted_zones: HostedZones,
}

#[derive(Debug, Default, Deserialize)]
struct HostedZones {
    #[serde(rename = "HostedZone", default)]
    items: Vec<HostedZone>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostedZone {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListResourceRecordSetsResponse {
    #[serde(default)]
    resource_record_sets: ResourceRecordSets,
}

#[derive(Debug, Default, Deserialize)]
struct ResourceRecordSets {
    #[serde(rename = "ResourceRecordSet", default)]
    items: Vec<ResourceRecordSet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResourceRecordSet {
    name: String,
    #[serde(rename = "Type")]
    record_type: String,
    #[serde(rename = "TTL", default)]
    ttl: Option<u32>,
    #[serde(default)]
    resource_records: ResourceRecords,
}

#[derive(Debug, Default, Deserialize)]
struct ResourceRecords {
    #[serde(rename = "ResourceRecord", default)]
    items: Vec<ResourceRecordValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResourceRecordValue {
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ChangeResourceRecordSetsResponse {
    change_info: ChangeInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ChangeInfo {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorDetail {
    code: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD_SETS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListResourceRecordSetsResponse xmlns="https://route53.amazonaws.com/doc/2013-04-01/">
  <ResourceRecordSets>
    <ResourceRecordSet>
      <Name>example.com.</Name>
      <Type>A</Type>
      <TTL>300</TTL>
      <ResourceRecords>
        <ResourceRecord><Value>203.0.113.5</Value></ResourceRecord>
      </ResourceRecords>
    </ResourceRecordSet>
    <ResourceRecordSet>
      <Name>example.com.</Name>
      <Type>MX</Type>
      <TTL>300</TTL>
      <ResourceRecords>
        <ResourceRecord><Value>10 mail.example.com</Value></ResourceRecord>
      </ResourceRecords>
    </ResourceRecordSet>
    <ResourceRecordSet>
      <Name>\052.example.com.</Name>
      <Type>A</Type>
      <TTL>300</TTL>
      <ResourceRecords>
        <ResourceRecord><Value>203.0.113.5</Value></ResourceRecord>
      </ResourceRecords>
    </ResourceRecordSet>
  </ResourceRecordSets>
  <IsTruncated>false</IsTruncated>
  <MaxItems>100</MaxItems>
</ListResourceRecordSetsResponse>"#;

    #[test]
    fn filters_record_sets_to_exact_name_and_type() {
        let response: ListResourceRecordSetsResponse = decode(RECORD_SETS).unwrap();
        let records = matching_records(response, "example.com", RecordType::A);
        assert_eq!(records, vec![DnsRecord::new("example.com", RecordType::A, "203.0.113.5", 300)]);
    }

    #[test]
    fn wildcard_names_are_decoded() {
        let response: ListResourceRecordSetsResponse = decode(RECORD_SETS).unwrap();
        let records = matching_records(response, "*.example.com", RecordType::A);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "*.example.com");
    }

    #[test]
    fn empty_record_set_list_decodes() {
        let body = r#"<ListResourceRecordSetsResponse><ResourceRecordSets></ResourceRecordSets><IsTruncated>false</IsTruncated></ListResourceRecordSetsResponse>"#;
        let response: ListResourceRecordSetsResponse = decode(body).unwrap();
        assert!(matching_records(response, "example.com", RecordType::A).is_empty());
    }

    #[test]
    fn hosted_zone_response_decodes() {
        let body = r#"<ListHostedZonesByNameResponse xmlns="https://route53.amazonaws.com/doc/2013-04-01/">
  <HostedZones>
    <HostedZone>
      <Id>/hostedzone/Z111111QQQQQQQ</Id>
      <Name>example.com.</Name>
      <CallerReference>MyUniqueIdentifier</CallerReference>
      <ResourceRecordSetCount>17</ResourceRecordSetCount>
    </HostedZone>
  </HostedZones>
  <DNSName>example.com.</DNSName>
  <IsTruncated>false</IsTruncated>
  <MaxItems>1</MaxItems>
</ListHostedZonesByNameResponse>"#;
        let response: ListHostedZonesByNameResponse = decode(body).unwrap();
        assert_eq!(response.hosted_zones.items.len(), 1);
        assert_eq!(response.hosted_zones.items[0].id, "/hostedzone/Z111111QQQQQQQ");
    }

    #[test]
    fn change_batch_carries_upsert_and_ttl() {
        let record = DnsRecord::new("*.example.com", RecordType::A, "203.0.113.5", 300);
        let xml = change_batch_xml(true, &record);
        assert!(xml.contains("<Action>UPSERT</Action>"));
        assert!(xml.contains("<Name>*.example.com.</Name>"));
        assert!(xml.contains("<TTL>300</TTL>"));
        assert!(xml.contains("<Value>203.0.113.5</Value>"));
    }

    #[test]
    fn change_batch_without_overwrite_uses_create() {
        let record = DnsRecord::new("example.com", RecordType::A, "203.0.113.5", 300);
        let xml = change_batch_xml(false, &record);
        assert!(xml.contains("<Action>CREATE</Action>"));
        assert!(!xml.contains("UPSERT"));
    }

    #[test]
    fn error_body_is_summarized() {
        let body = r#"<ErrorResponse xmlns="https://route53.amazonaws.com/doc/2013-04-01/"><Error><Type>Sender</Type><Code>InvalidChangeBatch</Code><Message>Tried to create resource record set but it already exists</Message></Error><RequestId>abc</RequestId></ErrorResponse>"#;
        assert_eq!(
            error_message(body),
            "InvalidChangeBatch: Tried to create resource record set but it already exists"
        );
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let credentials = AwsCredentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI".into(),
            session_token: None,
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("wJalrXUtnFEMI"));
    }
}
