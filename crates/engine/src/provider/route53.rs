use async_trait::async_trait;
use berth_api::{ApiError, Route53Client};
use berth_types::{DnsRecord, RecordType};

use super::DnsProvider;

/// [`DnsProvider`] over Route 53.
#[derive(Debug, Clone)]
pub struct Route53Dns {
    client: Route53Client,
}

impl Route53Dns {
    pub fn new(client: Route53Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DnsProvider for Route53Dns {
    async fn get_records(&self, zone: &str, name: &str, record_type: RecordType) -> Result<Vec<DnsRecord>, ApiError> {
        self.client.get_records(zone, name, record_type).await
    }

    async fn create_record(&self, zone: &str, record: &DnsRecord, overwrite: bool) -> Result<(), ApiError> {
        self.client.create_record(zone, record, overwrite).await.map(|_| ())
    }
}
