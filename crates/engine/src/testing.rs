//! In-memory providers and host shells for phase tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use berth_api::ApiError;
use berth_types::{DnsRecord, RecordType, normalize_dns_name};

use crate::provider::{ComputeProvider, DnsProvider, ServerHandle, ServerRequest};
use crate::remote::{CommandOutput, RemoteError, RemoteShell};

#[derive(Default)]
struct ComputeState {
    uploaded: Vec<String>,
    servers: HashMap<String, String>,
    created: usize,
}

pub struct FakeCompute {
    ip_address: String,
    fail_key_upload: bool,
    state: Mutex<ComputeState>,
}

impl FakeCompute {
    pub fn new(ip_address: &str) -> Self {
        Self {
            ip_address: ip_address.to_string(),
            fail_key_upload: false,
            state: Mutex::new(ComputeState::default()),
        }
    }

    pub fn failing_key_upload(mut self) -> Self {
        self.fail_key_upload = true;
        self
    }

    pub fn uploaded_keys(&self) -> Vec<String> {
        self.state.lock().unwrap().uploaded.clone()
    }

    pub fn servers_created(&self) -> usize {
        self.state.lock().unwrap().created
    }
}

#[async_trait]
impl ComputeProvider for FakeCompute {
    async fn upload_key(&self, name: &str, _public_key: &str) -> Result<u64, ApiError> {
        if self.fail_key_upload {
            return Err(ApiError::Status {
                service: "fake",
                status: 422,
                message: "key rejected".into(),
            });
        }
        let mut state = self.state.lock().unwrap();
        state.uploaded.push(name.to_string());
        Ok(state.uploaded.len() as u64)
    }

    async fn create_or_get_server(&self, request: &ServerRequest) -> Result<ServerHandle, ApiError> {
        let mut state = self.state.lock().unwrap();
        if let Some(ip_address) = state.servers.get(&request.name) {
            return Ok(ServerHandle {
                ip_address: ip_address.clone(),
                changed: false,
            });
        }
        state.servers.insert(request.name.clone(), self.ip_address.clone());
        state.created += 1;
        Ok(ServerHandle {
            ip_address: self.ip_address.clone(),
            changed: true,
        })
    }
}

#[derive(Default)]
pub struct FakeDns {
    records: Mutex<Vec<DnsRecord>>,
    created: Mutex<Vec<(String, DnsRecord, bool)>>,
    lookups: Mutex<usize>,
}

impl FakeDns {
    pub fn with_records(records: Vec<DnsRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    pub fn lookups(&self) -> usize {
        *self.lookups.lock().unwrap()
    }

    /// `(zone, record, overwrite)` for every create call.
    pub fn created(&self) -> Vec<(String, DnsRecord, bool)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl DnsProvider for FakeDns {
    async fn get_records(&self, _zone: &str, name: &str, record_type: RecordType) -> Result<Vec<DnsRecord>, ApiError> {
        *self.lookups.lock().unwrap() += 1;
        let wanted = normalize_dns_name(name);
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|record| normalize_dns_name(&record.name) == wanted && record.record_type == record_type)
            .cloned()
            .collect())
    }

    async fn create_record(&self, zone: &str, record: &DnsRecord, overwrite: bool) -> Result<(), ApiError> {
        self.records.lock().unwrap().push(record.clone());
        self.created.lock().unwrap().push((zone.to_string(), record.clone(), overwrite));
        Ok(())
    }
}

#[derive(Default)]
struct HostState {
    files: BTreeMap<String, String>,
    symlinks: BTreeMap<String, String>,
    commands: Vec<String>,
    inputs: Vec<(String, String)>,
}

/// A host whose filesystem and command log live in memory.
///
/// Every command succeeds with empty output unless it starts with a prefix
/// registered through [`FakeHost::respond`] or [`FakeHost::fail_on`].
pub struct FakeHost {
    address: String,
    responses: Vec<(String, CommandOutput)>,
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            responses: Vec::new(),
            state: Mutex::new(HostState::default()),
        }
    }

    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.state.lock().unwrap().files.insert(path.to_string(), contents.to_string());
        self
    }

    pub fn respond(mut self, prefix: &str, stdout: &str) -> Self {
        self.responses.push((
            prefix.to_string(),
            CommandOutput {
                status: 0,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        ));
        self
    }

    pub fn fail_on(mut self, prefix: &str, status: i32, stderr: &str) -> Self {
        self.responses.push((
            prefix.to_string(),
            CommandOutput {
                status,
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        ));
        self
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn symlink_target(&self, link: &str) -> Option<String> {
        self.state.lock().unwrap().symlinks.get(link).cloned()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn count_commands(&self, prefix: &str) -> usize {
        self.commands().iter().filter(|command| command.starts_with(prefix)).count()
    }

    /// `(command, stdin)` pairs for commands that were fed input.
    pub fn inputs(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().inputs.clone()
    }
}

#[async_trait]
impl RemoteShell for FakeHost {
    fn address(&self) -> &str {
        &self.address
    }

    async fn exec(&self, command: &str, input: Option<&str>) -> Result<CommandOutput, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(command.to_string());
        if let Some(input) = input {
            state.inputs.push((command.to_string(), input.to_string()));
        }
        if let Some(rest) = command.strip_prefix("git clone ")
            && let Some(dir) = rest.split_whitespace().last()
        {
            state.files.insert(format!("{dir}/.git"), String::new());
        }
        let output = self
            .responses
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default();
        Ok(output)
    }

    async fn file_exists(&self, path: &str) -> Result<bool, RemoteError> {
        let state = self.state.lock().unwrap();
        Ok(state.files.contains_key(path) || state.symlinks.contains_key(path))
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>, RemoteError> {
        Ok(self.state.lock().unwrap().files.get(path).cloned())
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), RemoteError> {
        self.state.lock().unwrap().files.insert(path.to_string(), contents.to_string());
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<bool, RemoteError> {
        let mut state = self.state.lock().unwrap();
        let removed_file = state.files.remove(path).is_some();
        let removed_link = state.symlinks.remove(path).is_some();
        Ok(removed_file || removed_link)
    }

    async fn symlink(&self, target: &str, link: &str) -> Result<(), RemoteError> {
        self.state.lock().unwrap().symlinks.insert(link.to_string(), target.to_string());
        Ok(())
    }
}
