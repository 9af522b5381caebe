//! Cryptographic engine
//!
//! All key material handling for the daemon:
//!
//! - **KEK derivation**: scrypt (N=2^15, r=8, p=1) over the login secret
//! - **Login proof**: Ed25519 keypair seeded from the scrypt KEK; the login
//!   HMAC is HMAC-SHA256 keyed by the signature over the login token
//! - **Master key**: 256 random bits wrapped under the KEK with
//!   XSalsa20-Poly1305, layout `salt(16) || nonce(24) || box`
//! - **Org keypairs**: one Ed25519 signing and one Curve25519 encryption
//!   pair; private scalars sealed under HKDF(master, pnonce)
//! - **Claims**: Ed25519 over the canonical body serialization
//! - **Credentials**: keyring MEK secretbox; member records wrap the MEK to
//!   a member's encryption key with `crypto_box`
//!
//! The engine is parameterized by a session store so machine creation can
//! run the same operations under an ephemeral machine session without
//! touching the daemon-wide one. Failures never return partial plaintext.

use std::sync::Arc;

use crypto_box::aead::Aead as BoxAead;
use crypto_box::SalsaBox;
use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::{Key, Nonce, XSalsa20Poly1305};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use scrypt::Params;
use sha2::Sha256;
use time::OffsetDateTime;
use zeroize::{Zeroize, Zeroizing};

use common::canonical::{to_canonical_vec, CanonicalError};
use common::encoding::Base64Url;
use common::envelope::{Envelope, Signature, Signed};
use common::identity::{Id, ObjectType};
use common::primitive::{
    alg, Body, Claim, KeyType, MasterKey, PrivateKey, PublicKey, SealedValue,
};

use crate::secure::{Guard, SecretHandle, SecureError};
use crate::session::{SessionError, SessionStore};

/// scrypt cost parameters: N=2^15, r=8, p=1
const SCRYPT_LOG_N: u8 = 15;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

pub const SALT_SIZE: usize = 16;
pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;
pub const TOKEN_SECRET_SIZE: usize = 32;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("cryptographic operation failed: {0}")]
    Failure(&'static str),
    #[error("operation requires an active session")]
    SessionRequired,
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
    #[error(transparent)]
    Secure(#[from] SecureError),
}

impl From<SessionError> for CryptoError {
    fn from(_: SessionError) -> Self {
        CryptoError::SessionRequired
    }
}

/// Fill a buffer from the system RNG.
fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buff = [0u8; N];
    getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
    buff
}

/// Generate a random 16-byte salt.
pub fn generate_salt() -> Base64Url {
    Base64Url::new(random_bytes::<SALT_SIZE>().to_vec())
}

/// Generate a random 256-bit machine token secret into guarded memory.
pub fn generate_token_secret(guard: &Guard) -> Result<SecretHandle, CryptoError> {
    let mut secret = random_bytes::<TOKEN_SECRET_SIZE>();
    Ok(guard.import(&mut secret)?)
}

/// Derive a 256-bit key-encryption key from a login secret and salt.
pub fn derive_kek(secret: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    if secret.is_empty() {
        return Err(CryptoError::InvalidInput("empty secret"));
    }

    let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_SIZE)
        .map_err(|_| CryptoError::Failure("scrypt parameters"))?;

    let mut kek = Zeroizing::new([0u8; KEY_SIZE]);
    scrypt::scrypt(secret, salt, &params, kek.as_mut())
        .map_err(|_| CryptoError::Failure("scrypt derivation"))?;
    Ok(kek)
}

/// An Ed25519 login keypair derived from a secret and salt.
///
/// The registry stores the public half and the salt; a login proves
/// possession of the secret by re-deriving the keypair.
pub struct LoginKeypair {
    signing: SigningKey,
    salt: Base64Url,
}

impl LoginKeypair {
    pub fn public_key(&self) -> Base64Url {
        Base64Url::new(self.signing.verifying_key().to_bytes().to_vec())
    }

    pub fn salt(&self) -> &Base64Url {
        &self.salt
    }
}

/// Derive the login keypair: an Ed25519 pair seeded by scrypt(secret, salt).
pub fn derive_login_keypair(secret: &[u8], salt: &Base64Url) -> Result<LoginKeypair, CryptoError> {
    let seed = derive_kek(secret, salt)?;
    let signing = SigningKey::from_bytes(&seed);
    Ok(LoginKeypair {
        signing,
        salt: salt.clone(),
    })
}

/// Compute the login HMAC: HMAC-SHA256 keyed by the Ed25519 signature over
/// the login token, over the login token itself.
pub fn login_hmac(keypair: &LoginKeypair, login_token: &str) -> Result<Base64Url, CryptoError> {
    let signature = keypair.signing.sign(login_token.as_bytes());

    let mut mac = <HmacSha256 as Mac>::new_from_slice(&signature.to_bytes())
        .map_err(|_| CryptoError::Failure("hmac key"))?;
    mac.update(login_token.as_bytes());
    Ok(Base64Url::new(mac.finalize().into_bytes().to_vec()))
}

/// Generate a fresh master key and wrap it under a KEK derived from the
/// login secret. The KEK salt and box nonce travel inside `value`.
pub fn create_master_key_object(secret: &[u8]) -> Result<MasterKey, CryptoError> {
    let mut master = Zeroizing::new(random_bytes::<KEY_SIZE>());
    let salt = random_bytes::<SALT_SIZE>();
    let nonce = random_bytes::<NONCE_SIZE>();

    let kek = derive_kek(secret, &salt)?;
    let cipher = XSalsa20Poly1305::new(Key::from_slice(kek.as_ref()));
    let boxed = cipher
        .encrypt(Nonce::from_slice(&nonce), master.as_slice())
        .map_err(|_| CryptoError::Failure("master key wrap"))?;
    master.zeroize();

    let mut value = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + boxed.len());
    value.extend_from_slice(&salt);
    value.extend_from_slice(&nonce);
    value.extend_from_slice(&boxed);

    Ok(MasterKey {
        alg: alg::TRIPLESEC.to_string(),
        value: Base64Url::new(value),
    })
}

/// Unwrap a master key object with the login secret into guarded memory.
///
/// A wrong secret or tampered value fails whole; no partial plaintext is
/// ever returned.
pub fn unwrap_master_key(
    guard: &Guard,
    secret: &[u8],
    master: &MasterKey,
) -> Result<SecretHandle, CryptoError> {
    if master.alg != alg::TRIPLESEC {
        return Err(CryptoError::InvalidInput("unknown master key algorithm"));
    }
    if master.value.len() <= SALT_SIZE + NONCE_SIZE {
        return Err(CryptoError::InvalidInput("master key value too short"));
    }

    let (salt, rest) = master.value.split_at(SALT_SIZE);
    let (nonce, boxed) = rest.split_at(NONCE_SIZE);

    let kek = derive_kek(secret, salt)?;
    let cipher = XSalsa20Poly1305::new(Key::from_slice(kek.as_ref()));
    let mut plain = cipher
        .decrypt(Nonce::from_slice(nonce), boxed)
        .map_err(|_| CryptoError::Failure("master key unwrap"))?;

    if plain.len() != KEY_SIZE {
        plain.zeroize();
        return Err(CryptoError::Failure("master key unwrap"));
    }
    Ok(guard.import(&mut plain)?)
}

/// Freshly generated signing and encryption keypairs for one org.
pub struct KeyPairs {
    pub signing: SigningKey,
    pub encryption: crypto_box::SecretKey,
}

impl KeyPairs {
    pub fn encryption_public(&self) -> crypto_box::PublicKey {
        self.encryption.public_key()
    }
}

/// The crypto engine: cryptographic operations bound to a session.
#[derive(Clone)]
pub struct Engine {
    session: SessionStore,
    guard: Guard,
}

impl Engine {
    pub fn new(session: SessionStore, guard: Guard) -> Self {
        Engine { session, guard }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// The session's master key, unwrapping it on first use. The plaintext
    /// stays in guarded memory for the session's lifetime.
    pub fn master_key(&self) -> Result<Arc<SecretHandle>, CryptoError> {
        if let Some(key) = self.session.master_key() {
            return Ok(key);
        }

        let master = self
            .session
            .master_envelope()
            .ok_or(CryptoError::SessionRequired)?;
        let unwrapped = self
            .session
            .with_secret(|secret| unwrap_master_key(&self.guard, secret, &master))??;
        Ok(self.session.cache_master_key(Arc::new(unwrapped))?)
    }

    /// Generate one Ed25519 signing pair and one Curve25519 encryption pair.
    pub fn generate_keypairs(&self) -> Result<KeyPairs, CryptoError> {
        let signing = SigningKey::from_bytes(&random_bytes::<KEY_SIZE>());
        let encryption = crypto_box::SecretKey::from(random_bytes::<KEY_SIZE>());
        Ok(KeyPairs {
            signing,
            encryption,
        })
    }

    /// Package the signing keypair into envelopes: a self-signed public key
    /// and a private key sealed under the session master key.
    pub fn package_signing_keypair(
        &self,
        org_id: Id,
        owner_id: Id,
        keypairs: &KeyPairs,
    ) -> Result<(Signed<PublicKey>, Envelope<PrivateKey>), CryptoError> {
        let body = PublicKey {
            org_id,
            owner_id,
            key_type: KeyType::Signing,
            alg: alg::EDDSA.to_string(),
            value: Base64Url::new(keypairs.signing.verifying_key().to_bytes().to_vec()),
            created: OffsetDateTime::now_utc(),
        };

        let public = self.sign_public_key(body, None, &keypairs.signing)?;
        let private = self.seal_private_scalar(
            org_id,
            owner_id,
            public.id,
            &keypairs.signing.to_bytes(),
        )?;
        Ok((public, private))
    }

    /// Package the encryption keypair, signed by the already-packaged
    /// signing key.
    pub fn package_encryption_keypair(
        &self,
        org_id: Id,
        owner_id: Id,
        keypairs: &KeyPairs,
        signing_key_id: Id,
    ) -> Result<(Signed<PublicKey>, Envelope<PrivateKey>), CryptoError> {
        let body = PublicKey {
            org_id,
            owner_id,
            key_type: KeyType::Encryption,
            alg: alg::CURVE25519.to_string(),
            value: Base64Url::new(keypairs.encryption_public().as_bytes().to_vec()),
            created: OffsetDateTime::now_utc(),
        };

        let public = self.sign_public_key(body, Some(signing_key_id), &keypairs.signing)?;
        let private = self.seal_private_scalar(
            org_id,
            owner_id,
            public.id,
            &keypairs.encryption.to_bytes(),
        )?;
        Ok((public, private))
    }

    fn sign_public_key(
        &self,
        body: PublicKey,
        signing_key_id: Option<Id>,
        signing: &SigningKey,
    ) -> Result<Signed<PublicKey>, CryptoError> {
        let canonical = to_canonical_vec(&body)?;
        let id = Id::new_immutable(ObjectType::PublicKey, &canonical);
        let signature = signing.sign(&canonical);

        Ok(Signed {
            id,
            version: 1,
            body,
            signature: Signature {
                alg: alg::EDDSA.to_string(),
                // the signing public key signs itself
                public_key_id: signing_key_id.unwrap_or(id),
                value: Base64Url::new(signature.to_bytes().to_vec()),
            },
        })
    }

    fn seal_private_scalar(
        &self,
        org_id: Id,
        owner_id: Id,
        public_key_id: Id,
        scalar: &[u8; KEY_SIZE],
    ) -> Result<Envelope<PrivateKey>, CryptoError> {
        let master = self.master_key()?;
        let pnonce = random_bytes::<NONCE_SIZE>();
        let nonce = random_bytes::<NONCE_SIZE>();

        let subkey = derive_subkey(master.borrow(), &pnonce)?;
        let cipher = XSalsa20Poly1305::new(Key::from_slice(subkey.as_ref()));
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), scalar.as_slice())
            .map_err(|_| CryptoError::Failure("private key seal"))?;

        let body = PrivateKey {
            org_id,
            owner_id,
            public_key_id,
            pnonce: Base64Url::new(pnonce.to_vec()),
            key: SealedValue {
                alg: alg::SECRETBOX.to_string(),
                nonce: Base64Url::new(nonce.to_vec()),
                value: Base64Url::new(sealed),
            },
        };

        let canonical = to_canonical_vec(&body)?;
        Ok(Envelope {
            id: Id::new_immutable(ObjectType::PrivateKey, &canonical),
            version: 1,
            body,
        })
    }

    /// Recover a private scalar sealed with [`Self::package_signing_keypair`]
    /// or [`Self::package_encryption_keypair`] into guarded memory.
    pub fn unseal_private_key(
        &self,
        private: &PrivateKey,
    ) -> Result<SecretHandle, CryptoError> {
        if private.key.alg != alg::SECRETBOX {
            return Err(CryptoError::InvalidInput("unknown private key algorithm"));
        }

        let master = self.master_key()?;
        let subkey = derive_subkey(master.borrow(), &private.pnonce)?;
        let cipher = XSalsa20Poly1305::new(Key::from_slice(subkey.as_ref()));
        let mut scalar = cipher
            .decrypt(
                Nonce::from_slice(&private.key.nonce),
                private.key.value.as_ref(),
            )
            .map_err(|_| CryptoError::Failure("private key unseal"))?;

        Ok(self.guard.import(&mut scalar)?)
    }

    /// Sign a claim body with the named signing key, producing the
    /// content-addressed signed envelope.
    pub fn signed_claim(
        &self,
        body: Claim,
        signing_key_id: Id,
        signing: &SigningKey,
    ) -> Result<Signed<Claim>, CryptoError> {
        let canonical = to_canonical_vec(&body)?;
        let id = Id::new_immutable(ObjectType::Claim, &canonical);
        let signature = signing.sign(&canonical);

        Ok(Signed {
            id,
            version: 1,
            body,
            signature: Signature {
                alg: alg::EDDSA.to_string(),
                public_key_id: signing_key_id,
                value: Base64Url::new(signature.to_bytes().to_vec()),
            },
        })
    }
}

/// Verify a signed envelope against a verifying key.
pub fn verify_signed<T: Body>(
    signed: &Signed<T>,
    verifying: &VerifyingKey,
) -> Result<(), CryptoError> {
    let canonical = to_canonical_vec(&signed.body)?;
    let bytes: [u8; 64] = signed
        .signature
        .value
        .as_ref()
        .try_into()
        .map_err(|_| CryptoError::InvalidInput("signature length"))?;
    let signature = ed25519_dalek::Signature::from_bytes(&bytes);

    verifying
        .verify_strict(&canonical, &signature)
        .map_err(|_| CryptoError::Failure("signature verification"))
}

/// Derive the per-key wrapping subkey: HKDF-SHA256(master, pnonce).
fn derive_subkey(master: &[u8], pnonce: &[u8]) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(Some(pnonce), master);
    let mut subkey = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(b"", subkey.as_mut())
        .map_err(|_| CryptoError::Failure("subkey derivation"))?;
    Ok(subkey)
}

/// Encrypt a credential value under a keyring MEK. Returns `(nonce, box)`.
pub fn box_credential(
    mek: &[u8],
    plaintext: &[u8],
) -> Result<(Base64Url, Base64Url), CryptoError> {
    if mek.len() != KEY_SIZE {
        return Err(CryptoError::InvalidInput("mek length"));
    }

    let nonce = random_bytes::<NONCE_SIZE>();
    let cipher = XSalsa20Poly1305::new(Key::from_slice(mek));
    let boxed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Failure("credential encryption"))?;

    Ok((Base64Url::new(nonce.to_vec()), Base64Url::new(boxed)))
}

/// Decrypt a credential value under a keyring MEK.
pub fn unbox_credential(
    mek: &[u8],
    nonce: &[u8],
    value: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if mek.len() != KEY_SIZE {
        return Err(CryptoError::InvalidInput("mek length"));
    }
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidInput("nonce length"));
    }

    let cipher = XSalsa20Poly1305::new(Key::from_slice(mek));
    let plain = cipher
        .decrypt(Nonce::from_slice(nonce), value)
        .map_err(|_| CryptoError::Failure("credential decryption"))?;
    Ok(Zeroizing::new(plain))
}

/// Wrap a keyring MEK to a member's encryption public key, with the
/// session's encryption key as the sender.
pub fn encrypt_member_key(
    mek: &[u8],
    member_public: &[u8],
    sender_secret: &crypto_box::SecretKey,
) -> Result<SealedValue, CryptoError> {
    let public: [u8; KEY_SIZE] = member_public
        .try_into()
        .map_err(|_| CryptoError::InvalidInput("member public key length"))?;

    let nonce = random_bytes::<NONCE_SIZE>();
    let salsa = SalsaBox::new(&crypto_box::PublicKey::from(public), sender_secret);
    let boxed = salsa
        .encrypt((&nonce).into(), mek)
        .map_err(|_| CryptoError::Failure("member key encryption"))?;

    Ok(SealedValue {
        alg: alg::EASYBOX.to_string(),
        nonce: Base64Url::new(nonce.to_vec()),
        value: Base64Url::new(boxed),
    })
}

/// Unwrap a keyring MEK from a member record.
pub fn decrypt_member_key(
    guard: &Guard,
    key: &SealedValue,
    sender_public: &[u8],
    recipient_secret: &crypto_box::SecretKey,
) -> Result<SecretHandle, CryptoError> {
    if key.alg != alg::EASYBOX {
        return Err(CryptoError::InvalidInput("unknown member key algorithm"));
    }
    let public: [u8; KEY_SIZE] = sender_public
        .try_into()
        .map_err(|_| CryptoError::InvalidInput("sender public key length"))?;
    let nonce: [u8; NONCE_SIZE] = key
        .nonce
        .as_ref()
        .try_into()
        .map_err(|_| CryptoError::InvalidInput("nonce length"))?;

    let salsa = SalsaBox::new(&crypto_box::PublicKey::from(public), recipient_secret);
    let mut mek = salsa
        .decrypt((&nonce).into(), key.value.as_ref())
        .map_err(|_| CryptoError::Failure("member key decryption"))?;

    Ok(guard.import(&mut mek)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use common::envelope::Envelope;
    use common::primitive::{LoginPublicKey, Machine, MachineState, MachineToken};

    fn machine_session() -> (Guard, SessionStore, SecretHandle) {
        let guard = Guard::new();
        let session = SessionStore::new();

        let secret_bytes = [7u8; TOKEN_SECRET_SIZE];
        let master = create_master_key_object(&secret_bytes).unwrap();
        let mut copy = secret_bytes.to_vec();
        let secret = guard.import(&mut copy).unwrap();

        let org_id = Id::new_mutable(ObjectType::Org);
        let machine_id = Id::new_mutable(ObjectType::Machine);
        let machine = Envelope {
            id: machine_id,
            version: 1,
            body: Machine {
                org_id,
                team_id: Id::new_mutable(ObjectType::Team),
                name: "workers-abc12".to_string(),
                state: MachineState::Active,
                created_by: Id::new_mutable(ObjectType::User),
                created: OffsetDateTime::now_utc(),
                destroyed_by: None,
                destroyed: None,
            },
        };
        let token = Envelope {
            id: Id::new_mutable(ObjectType::MachineToken),
            version: 1,
            body: MachineToken {
                org_id,
                machine_id,
                public_key: LoginPublicKey {
                    alg: alg::EDDSA.to_string(),
                    salt: generate_salt(),
                    value: Base64Url::new(vec![0; 32]),
                },
                master,
                state: MachineState::Active,
                created_by: Id::new_mutable(ObjectType::User),
                created: OffsetDateTime::now_utc(),
                destroyed_by: None,
                destroyed: None,
            },
        };

        let mut copy = [7u8; TOKEN_SECRET_SIZE].to_vec();
        let secret_handle = guard.import(&mut copy).unwrap();
        session
            .populate_machine(machine, token, secret_handle, "auth".to_string())
            .unwrap();
        (guard, session, secret)
    }

    #[test]
    fn test_kek_is_deterministic_and_salted() {
        let a = derive_kek(b"secret", &[1; SALT_SIZE]).unwrap();
        let b = derive_kek(b"secret", &[1; SALT_SIZE]).unwrap();
        let c = derive_kek(b"secret", &[2; SALT_SIZE]).unwrap();

        assert_eq!(a.as_ref(), b.as_ref());
        assert_ne!(a.as_ref(), c.as_ref());
    }

    #[test]
    fn test_login_keypair_and_hmac() {
        let salt = generate_salt();
        let keypair = derive_login_keypair(b"passphrase", &salt).unwrap();
        let again = derive_login_keypair(b"passphrase", &salt).unwrap();
        assert_eq!(keypair.public_key(), again.public_key());

        // The registry's check: re-key the HMAC from a signature made with
        // the stored public key's counterpart.
        let token = "lt-123456";
        let hmac = login_hmac(&keypair, token).unwrap();
        let expected = login_hmac(&again, token).unwrap();
        assert_eq!(hmac, expected);

        let other = derive_login_keypair(b"wrong", &salt).unwrap();
        assert_ne!(hmac, login_hmac(&other, token).unwrap());
    }

    #[test]
    fn test_master_key_wrap_unwrap_roundtrip() {
        let guard = Guard::new();
        let master = create_master_key_object(b"token-secret").unwrap();

        let unwrapped = unwrap_master_key(&guard, b"token-secret", &master).unwrap();
        assert_eq!(unwrapped.len(), KEY_SIZE);

        let again = unwrap_master_key(&guard, b"token-secret", &master).unwrap();
        assert_eq!(unwrapped.borrow(), again.borrow());
    }

    #[test]
    fn test_master_key_wrong_secret_fails_whole() {
        let guard = Guard::new();
        let master = create_master_key_object(b"token-secret").unwrap();

        let result = unwrap_master_key(&guard, b"token-secrex", &master);
        assert!(matches!(result, Err(CryptoError::Failure(_))));
    }

    #[test]
    fn test_master_key_bit_flip_fails() {
        let guard = Guard::new();
        let master = create_master_key_object(b"token-secret").unwrap();

        let mut tampered = master.value.to_vec();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        let tampered = MasterKey {
            alg: master.alg.clone(),
            value: Base64Url::new(tampered),
        };

        assert!(unwrap_master_key(&guard, b"token-secret", &tampered).is_err());
    }

    #[test]
    fn test_keypair_packaging_roundtrip() {
        let (_guard, session, _secret) = machine_session();
        let engine = Engine::new(session.clone(), Guard::new());

        let org_id = Id::new_mutable(ObjectType::Org);
        let owner_id = session.auth_id().unwrap();
        let keypairs = engine.generate_keypairs().unwrap();

        let (public, private) = engine
            .package_signing_keypair(org_id, owner_id, &keypairs)
            .unwrap();
        assert_eq!(public.id.object_type(), ObjectType::PublicKey);
        assert_eq!(public.signature.public_key_id, public.id);
        assert_eq!(private.body.public_key_id, public.id);

        let scalar = engine.unseal_private_key(&private.body).unwrap();
        assert_eq!(scalar.borrow(), &keypairs.signing.to_bytes()[..]);
    }

    #[test]
    fn test_claim_sign_and_verify() {
        let (_guard, session, _secret) = machine_session();
        let engine = Engine::new(session.clone(), Guard::new());

        let org_id = Id::new_mutable(ObjectType::Org);
        let owner_id = session.auth_id().unwrap();
        let keypairs = engine.generate_keypairs().unwrap();
        let (public, _) = engine
            .package_signing_keypair(org_id, owner_id, &keypairs)
            .unwrap();

        let claim = Claim::self_signature(org_id, owner_id, public.id, OffsetDateTime::now_utc());
        let signed = engine.signed_claim(claim, public.id, &keypairs.signing).unwrap();

        let verifying = keypairs.signing.verifying_key();
        verify_signed(&signed, &verifying).unwrap();

        // Recomputing the id from the body yields the stored id.
        let canonical = to_canonical_vec(&signed.body).unwrap();
        assert_eq!(signed.id, Id::new_immutable(ObjectType::Claim, &canonical));

        // Any body mutation breaks the signature.
        let mut tampered = signed.clone();
        tampered.body.owner_id = Id::new_mutable(ObjectType::Machine);
        assert!(verify_signed(&tampered, &verifying).is_err());
    }

    #[test]
    fn test_credential_box_roundtrip_hides_plaintext() {
        let mek = [3u8; KEY_SIZE];
        let plaintext = b"postgres://x";

        let (nonce, value) = box_credential(&mek, plaintext).unwrap();

        // Ciphertext must not contain the plaintext.
        let haystack = value.as_ref();
        assert!(!haystack
            .windows(plaintext.len())
            .any(|window| window == plaintext));

        let opened = unbox_credential(&mek, &nonce, &value).unwrap();
        assert_eq!(&*opened, plaintext);

        let wrong = [4u8; KEY_SIZE];
        assert!(unbox_credential(&wrong, &nonce, &value).is_err());
    }

    #[test]
    fn test_member_key_derivation_roundtrip() {
        let guard = Guard::new();
        let sender = crypto_box::SecretKey::from(random_bytes::<KEY_SIZE>());
        let member = crypto_box::SecretKey::from(random_bytes::<KEY_SIZE>());
        let mek = random_bytes::<KEY_SIZE>();

        let sealed =
            encrypt_member_key(&mek, member.public_key().as_bytes(), &sender).unwrap();

        let recovered = decrypt_member_key(
            &guard,
            &sealed,
            sender.public_key().as_bytes(),
            &member,
        )
        .unwrap();
        assert_eq!(recovered.borrow(), &mek[..]);

        // A different recipient cannot unwrap.
        let outsider = crypto_box::SecretKey::from(random_bytes::<KEY_SIZE>());
        assert!(decrypt_member_key(
            &guard,
            &sealed,
            sender.public_key().as_bytes(),
            &outsider,
        )
        .is_err());
    }

    #[test]
    fn test_engine_master_key_unwraps_once() {
        let (guard, session, _secret) = machine_session();
        let engine = Engine::new(session.clone(), guard);

        let first = engine.master_key().unwrap();
        let second = engine.master_key().unwrap();
        assert_eq!(first.borrow(), second.borrow());
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_nonces_do_not_repeat() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..256 {
            assert!(seen.insert(random_bytes::<NONCE_SIZE>()));
        }
    }
}
