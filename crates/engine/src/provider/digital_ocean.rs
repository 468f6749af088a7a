use async_trait::async_trait;
use berth_api::{ApiError, CreateDropletRequest, DigitalOceanClient};
use tracing::debug;

use super::{ComputeProvider, ServerHandle, ServerRequest};

/// [`ComputeProvider`] over the DigitalOcean API.
#[derive(Debug, Clone)]
pub struct DigitalOceanCompute {
    client: DigitalOceanClient,
}

impl DigitalOceanCompute {
    pub fn new(client: DigitalOceanClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ComputeProvider for DigitalOceanCompute {
    async fn upload_key(&self, name: &str, public_key: &str) -> Result<u64, ApiError> {
        let key = self.client.ensure_ssh_key(name, public_key).await?;
        Ok(key.id)
    }

    async fn create_or_get_server(&self, request: &ServerRequest) -> Result<ServerHandle, ApiError> {
        let (droplet, changed) = self.client.ensure_droplet(&to_droplet_request(request)).await?;
        let ip_address = droplet
            .public_ipv4()
            .ok_or_else(|| ApiError::Unexpected(format!("droplet '{}' has no public IPv4 address", droplet.name)))?
            .to_string();
        debug!(droplet_id = droplet.id, %ip_address, changed, "resolved droplet");
        Ok(ServerHandle { ip_address, changed })
    }
}

fn to_droplet_request(request: &ServerRequest) -> CreateDropletRequest {
    CreateDropletRequest {
        name: request.name.clone(),
        region: request.region.clone(),
        size: request.size.clone(),
        image: request.image.clone(),
        ssh_keys: request.key_ids.clone(),
        private_networking: request.private_networking,
        backups: request.backups,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn droplet_request_carries_sizing_and_keys() {
        let request = ServerRequest {
            name: "app.example.com".into(),
            key_ids: vec![7, 9],
            region: "nyc3".into(),
            image: "ubuntu-14-04-x64".into(),
            size: "1gb".into(),
            private_networking: true,
            backups: false,
        };
        let droplet = to_droplet_request(&request);
        assert_eq!(droplet.name, "app.example.com");
        assert_eq!(droplet.ssh_keys, vec![7, 9]);
        assert!(droplet.private_networking);
        assert!(!droplet.backups);
    }
}
