//! Offline machine-token lifecycle: wrap a master key under a token secret,
//! log the session in, run the crypto engine as the machine, and check that
//! logout leaves no guarded memory behind.

use time::OffsetDateTime;

use common::encoding::Base64Url;
use common::envelope::Envelope;
use common::identity::{Id, ObjectType};
use common::primitive::{alg, Claim, LoginPublicKey, Machine, MachineState, MachineToken};

use torus_daemon::crypto::{
    self, create_master_key_object, derive_login_keypair, generate_salt, unwrap_master_key,
    verify_signed,
};
use torus_daemon::secure::Guard;
use torus_daemon::session::SessionStore;

const TOKEN_SECRET: [u8; 32] = [42; 32];

fn build_token(org_id: Id, machine_id: Id, created_by: Id) -> Envelope<MachineToken> {
    let salt = generate_salt();
    let login = derive_login_keypair(&TOKEN_SECRET, &salt).unwrap();
    let master = create_master_key_object(&TOKEN_SECRET).unwrap();

    Envelope {
        id: Id::new_mutable(ObjectType::MachineToken),
        version: 1,
        body: MachineToken {
            org_id,
            machine_id,
            public_key: LoginPublicKey {
                alg: alg::EDDSA.to_string(),
                salt: login.salt().clone(),
                value: login.public_key(),
            },
            master,
            state: MachineState::Active,
            created_by,
            created: OffsetDateTime::now_utc(),
            destroyed_by: None,
            destroyed: None,
        },
    }
}

fn build_machine(org_id: Id, created_by: Id) -> Envelope<Machine> {
    Envelope {
        id: Id::new_mutable(ObjectType::Machine),
        version: 1,
        body: Machine {
            org_id,
            team_id: Id::new_mutable(ObjectType::Team),
            name: "workers-abc12".to_string(),
            state: MachineState::Active,
            created_by,
            created: OffsetDateTime::now_utc(),
            destroyed_by: None,
            destroyed: None,
        },
    }
}

#[test]
fn machine_token_roundtrip() {
    let guard = Guard::new();
    let org_id = Id::new_mutable(ObjectType::Org);
    let created_by = Id::new_mutable(ObjectType::User);

    let machine = build_machine(org_id, created_by);
    let token = build_token(org_id, machine.id, created_by);

    // The login keypair re-derives from the secret and the recorded salt.
    let relogin = derive_login_keypair(&TOKEN_SECRET, &token.body.public_key.salt).unwrap();
    assert_eq!(relogin.public_key(), token.body.public_key.value);

    // The master key unwraps with the right secret and refuses a flipped bit.
    let master = unwrap_master_key(&guard, &TOKEN_SECRET, &token.body.master).unwrap();
    assert_eq!(master.len(), 32);

    let mut flipped = TOKEN_SECRET;
    flipped[0] ^= 0x01;
    assert!(unwrap_master_key(&guard, &flipped, &token.body.master).is_err());
}

#[test]
fn machine_session_crypto_and_logout_secrecy() {
    let guard = Guard::new();
    let session = SessionStore::new();
    let org_id = Id::new_mutable(ObjectType::Org);
    let created_by = Id::new_mutable(ObjectType::User);

    let machine = build_machine(org_id, created_by);
    let token = build_token(org_id, machine.id, created_by);
    let token_id = token.id;

    let mut secret = TOKEN_SECRET.to_vec();
    let handle = guard.import(&mut secret).unwrap();
    session
        .populate_machine(machine, token, handle, "auth-token".to_string())
        .unwrap();

    // Run the crypto engine as the machine: generate, package, claim.
    let engine = crypto::Engine::new(session.clone(), guard.clone());
    let pairs = engine.generate_keypairs().unwrap();
    let (public_sig, private_sig) = engine
        .package_signing_keypair(org_id, token_id, &pairs)
        .unwrap();

    let claim = Claim::self_signature(org_id, token_id, public_sig.id, OffsetDateTime::now_utc());
    let signed = engine
        .signed_claim(claim, public_sig.id, &pairs.signing)
        .unwrap();
    verify_signed(&signed, &pairs.signing.verifying_key()).unwrap();

    // The sealed scalar recovers through the session master key.
    let scalar = engine.unseal_private_key(&private_sig.body).unwrap();
    assert_eq!(scalar.borrow(), &pairs.signing.to_bytes()[..]);
    drop(scalar);

    assert!(guard.live() > 0);
    session.logout();
    assert_eq!(guard.live(), 0, "logout must release every guarded buffer");
}

#[test]
fn token_secret_encoding_is_256_bits() {
    let guard = Guard::new();
    let secret = crypto::generate_token_secret(&guard).unwrap();
    assert_eq!(secret.len(), 32);

    let encoded = Base64Url::new(secret.borrow().to_vec()).encoded();
    let decoded = Base64Url::from_encoded(&encoded).unwrap();
    assert_eq!(&*decoded, secret.borrow());
}
