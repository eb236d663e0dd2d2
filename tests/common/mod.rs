//! A totally local test system: cores wired together by direct delivery, with
//! an identity signature scheme standing in for the host's crypto.

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tendermint_core::{
    Backend, Block, BlockHash, BlockHeader, CommittedSeal, Config, ConsensusError, Core, Height,
    SignatureBytes, ValidatorAddress, ValidatorSet,
};

const ADDRESS_LENGTH: usize = 20;
const SEAL_LENGTH: usize = 65;

pub fn setup_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A backend whose "signature" is the signer's address followed by the
/// digest. Recovery reads the address back out, so every message checks out
/// as long as the envelope is honest.
pub struct TestBackend {
    address: ValidatorAddress,
    validators: Vec<ValidatorAddress>,
    peers: RwLock<HashMap<ValidatorAddress, Arc<Core<TestBackend>>>>,
    own_core: RwLock<Option<Arc<Core<TestBackend>>>>,
    committed: Mutex<Vec<(Block, Vec<CommittedSeal>)>>,
}

impl TestBackend {
    fn new(address: ValidatorAddress, validators: Vec<ValidatorAddress>) -> TestBackend {
        TestBackend {
            address,
            validators,
            peers: RwLock::new(HashMap::new()),
            own_core: RwLock::new(None),
            committed: Mutex::new(Vec::new()),
        }
    }

    pub fn committed_count(&self) -> usize {
        self.committed.lock().len()
    }

    pub fn committed_hash(&self, height: u64) -> Option<BlockHash> {
        self.committed
            .lock()
            .iter()
            .find(|(block, _)| block.number() == Height::new(height))
            .map(|(block, _)| block.hash())
    }

    pub fn committed_seal_count(&self, height: u64) -> Option<usize> {
        self.committed
            .lock()
            .iter()
            .find(|(block, _)| block.number() == Height::new(height))
            .map(|(_, seals)| seals.len())
    }
}

impl Backend for TestBackend {
    fn address(&self) -> ValidatorAddress {
        self.address
    }

    fn sign(&self, digest: &[u8]) -> Result<SignatureBytes, ConsensusError> {
        let mut bytes = Vec::with_capacity(SEAL_LENGTH);
        bytes.extend_from_slice(&self.address.bytes());
        bytes.extend_from_slice(digest);
        bytes.resize(SEAL_LENGTH, 0);
        Ok(SignatureBytes::new(bytes))
    }

    fn recover_sender(
        &self,
        _digest: &[u8],
        signature: &SignatureBytes,
    ) -> Result<ValidatorAddress, ConsensusError> {
        let bytes = signature.bytes();
        if bytes.len() < ADDRESS_LENGTH {
            return Err(ConsensusError::InvalidMessage);
        }
        let mut address = [0; ADDRESS_LENGTH];
        address.copy_from_slice(&bytes[..ADDRESS_LENGTH]);
        Ok(ValidatorAddress::new(address))
    }

    fn validators(&self, _height: Height) -> Option<ValidatorSet> {
        Some(ValidatorSet::new(self.validators.clone()))
    }

    fn last_committed_block(&self) -> (Block, ValidatorAddress) {
        match self.committed.lock().last() {
            Some((block, _)) => (block.clone(), block.proposer()),
            None => {
                let genesis = make_block(0, *self.validators.last().expect("validators"));
                let proposer = genesis.proposer();
                (genesis, proposer)
            }
        }
    }

    fn commit(&self, block: Block, seals: Vec<CommittedSeal>) -> Result<(), ConsensusError> {
        self.committed.lock().push((block, seals));
        // The "chain" wrote the block; tell the core immediately.
        if let Some(core) = self.own_core.read().as_ref() {
            core.post_committed();
        }
        Ok(())
    }

    fn broadcast(&self, validators: &ValidatorSet, payload: Vec<u8>) {
        let peers = self.peers.read();
        for address in validators.validators() {
            if let Some(core) = peers.get(address) {
                core.post_message(payload.clone());
            }
        }
    }

    fn gossip(&self, _validators: &ValidatorSet, _payload: Vec<u8>) {
        // Everyone is directly connected; re-forwarding would only loop
        // messages around.
    }

    fn ask_sync(&self, _validators: &ValidatorSet) {}

    fn sync_peer(&self, _peer: &ValidatorAddress, _payloads: Vec<Vec<u8>>) {}
}

pub struct TestNode {
    pub address: ValidatorAddress,
    pub core: Arc<Core<TestBackend>>,
    pub backend: Arc<TestBackend>,
}

/// Build `n` fully connected nodes sharing one validator set.
pub fn test_system(n: usize) -> Vec<TestNode> {
    let mut rng = rand::thread_rng();
    let addresses: Vec<ValidatorAddress> = (0..n)
        .map(|_| {
            let mut bytes = [0u8; ADDRESS_LENGTH];
            rng.fill(&mut bytes[..]);
            ValidatorAddress::new(bytes)
        })
        .collect();

    let backends: Vec<Arc<TestBackend>> = addresses
        .iter()
        .map(|address| Arc::new(TestBackend::new(*address, addresses.clone())))
        .collect();
    let cores: Vec<Arc<Core<TestBackend>>> = backends
        .iter()
        .map(|backend| Arc::new(Core::new(backend.clone(), Config::default())))
        .collect();

    for backend in &backends {
        let mut peers = backend.peers.write();
        for (address, core) in addresses.iter().zip(cores.iter()) {
            peers.insert(*address, core.clone());
        }
    }
    for (backend, core) in backends.iter().zip(cores.iter()) {
        *backend.own_core.write() = Some(core.clone());
    }

    addresses
        .into_iter()
        .zip(cores)
        .zip(backends)
        .map(|((address, core), backend)| TestNode {
            address,
            core,
            backend,
        })
        .collect()
}

pub fn make_block(height: u64, proposer: ValidatorAddress) -> Block {
    Block {
        header: BlockHeader {
            number: Height::new(height),
            parent_hash: BlockHash::new([0; 32]),
            proposer,
            committed_seals: Vec::new(),
            extra: Vec::new(),
        },
        body: Vec::new(),
    }
}

/// Poll `pred` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    false
}
