//! # Custody Gateway 暗号処理
//!
//! チェーン互換のアドレス導出とインテント署名を実装する。
//!
//! ## 署名スキーム
//! | スキーム | フラグ | 署名対象ダイジェスト |
//! |---------|-------|-------------------|
//! | Ed25519（ネイティブ） | 0x00 | BLAKE2b-256(intent \|\| tx) |
//! | secp256k1 | 0x01 | SHA-256(BLAKE2b-256(intent \|\| tx)) |
//!
//! secp256k1のみ二段目のSHA-256が必要になる。チェーンの検証器は
//! 非ネイティブ曲線に対して前処理済みダイジェストを期待するためで、
//! この一段を省くと形式上は正しいが検証で拒否される署名になる。

use base64::Engine;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use ed25519_dalek::Signer as _;
use k256::ecdsa::signature::hazmat::PrehashSigner;
use sha2::Sha256;

/// 256ビット出力のBLAKE2b。チェーン指定のアドレス・メッセージハッシュ。
type Blake2b256 = Blake2b<U32>;

/// Base64エンジン（Standard）
fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

/// 暗号処理のエラー型
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// 秘密鍵が曲線のスカラとして不正
    #[error("秘密鍵が不正です: {0}")]
    InvalidSecretKey(String),
    /// 曲線ライブラリの署名失敗。入力は決定論的なので再試行しても成功しない。
    #[error("署名に失敗しました: {0}")]
    SigningFailed(String),
}

// ---------------------------------------------------------------------------
// 署名スキームフラグ
// ---------------------------------------------------------------------------

/// 署名スキーム。1バイトのフラグで識別され、フラグは
/// アドレス導出の入力と直列化署名の先頭の両方に付く。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// チェーンネイティブのEd25519
    Ed25519,
    /// secp256k1 ECDSA
    Secp256k1,
    /// secp256r1 (P-256) ECDSA
    Secp256r1,
    /// マルチシグ
    MultiSig,
}

impl SignatureScheme {
    /// スキームのフラグバイトを返す。
    pub fn flag(self) -> u8 {
        match self {
            SignatureScheme::Ed25519 => 0x00,
            SignatureScheme::Secp256k1 => 0x01,
            SignatureScheme::Secp256r1 => 0x02,
            SignatureScheme::MultiSig => 0x03,
        }
    }
}

/// トランザクションデータのインテントドメイン（3バイト）。
/// 署名対象を意味的なドメインごとに分離し、署名の文脈外再利用を防ぐ。
pub const INTENT_BYTES: [u8; 3] = [0, 0, 0];

// ---------------------------------------------------------------------------
// アドレス導出
// ---------------------------------------------------------------------------

/// 公開鍵とスキームフラグからチェーンアドレスを導出する。
///
/// `0x || hex(BLAKE2b-256(flag || compressed_pubkey))`。
/// ダイジェストは切り詰めない。純粋関数で、同じ入力からは常に
/// 同じアドレスが得られる（チェーン側報告値との突き合わせに使う）。
pub fn derive_address(scheme: SignatureScheme, compressed_pubkey: &[u8]) -> String {
    let mut hasher = Blake2b256::new();
    hasher.update([scheme.flag()]);
    hasher.update(compressed_pubkey);
    format!("0x{}", hex::encode(hasher.finalize()))
}

/// インテントメッセージを構築する: `INTENT_BYTES || tx_bytes`。
fn message_with_intent(tx_bytes: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(INTENT_BYTES.len() + tx_bytes.len());
    message.extend_from_slice(&INTENT_BYTES);
    message.extend_from_slice(tx_bytes);
    message
}

/// インテントメッセージの一段目ダイジェスト（全スキーム共通）。
fn intent_digest(tx_bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(message_with_intent(tx_bytes));
    hasher.finalize().into()
}

/// secp256k1用の署名対象ダイジェスト。
/// 一段目のBLAKE2b-256をさらにSHA-256にかける（この曲線のみ必須）。
fn secp256k1_signing_digest(tx_bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(intent_digest(tx_bytes));
    hasher.finalize().into()
}

/// 直列化署名を組み立てる: `base64(flag || signature || pubkey)`。
fn serialize_signature(scheme: SignatureScheme, signature: &[u8], pubkey: &[u8]) -> String {
    let mut out = Vec::with_capacity(1 + signature.len() + pubkey.len());
    out.push(scheme.flag());
    out.extend_from_slice(signature);
    out.extend_from_slice(pubkey);
    b64().encode(out)
}

// ---------------------------------------------------------------------------
// secp256k1キーペア
// ---------------------------------------------------------------------------

/// secp256k1キーペア。
///
/// 秘密鍵は構築後に変更されず、プロセス外に平文で出ることはない。
/// 署名は同期・CPU処理のみで、複数スレッドからの同時署名に追加の
/// ロックは不要。
pub struct Secp256k1Keypair {
    signing_key: k256::ecdsa::SigningKey,
}

impl Secp256k1Keypair {
    /// 32バイトの秘密スカラからキーペアを構築する。
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Result<Self, CryptoError> {
        let signing_key = k256::ecdsa::SigningKey::from_bytes(k256::FieldBytes::from_slice(secret))
            .map_err(|e| CryptoError::InvalidSecretKey(e.to_string()))?;
        Ok(Self { signing_key })
    }

    /// OS乱数で新しいキーペアを生成する。
    pub fn generate() -> Self {
        Self {
            signing_key: k256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// SEC1圧縮形式の公開鍵（33バイト）を返す。
    /// 先頭バイトはy座標の偶奇（0x02/0x03）、続く32バイトは
    /// ビッグエンディアンのx座標。
    pub fn public_key_bytes(&self) -> [u8; 33] {
        let point = self.signing_key.verifying_key().to_encoded_point(true);
        point
            .as_bytes()
            .try_into()
            .expect("圧縮SEC1点は常に33バイト")
    }

    /// このキーペアのチェーンアドレスを返す。
    pub fn address(&self) -> String {
        derive_address(SignatureScheme::Secp256k1, &self.public_key_bytes())
    }

    /// トランザクションバイト列に署名し、直列化署名を返す。
    ///
    /// 1. インテントメッセージを構築し、BLAKE2b-256でハッシュ
    /// 2. そのダイジェストをSHA-256で再ハッシュ（secp256k1のみ）
    /// 3. RFC 6979の決定論的ECDSAで署名し、sを正規化（low-s）
    /// 4. リカバリバイトを除いた64バイト（r, s）を
    ///    `flag || sig || pubkey` に組み立ててBase64化
    pub fn sign_transaction(&self, tx_bytes: &[u8]) -> Result<String, CryptoError> {
        let digest = secp256k1_signing_digest(tx_bytes);
        let signature: k256::ecdsa::Signature = self
            .signing_key
            .sign_prehash(&digest)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
        let signature = signature.normalize_s().unwrap_or(signature);
        Ok(serialize_signature(
            SignatureScheme::Secp256k1,
            signature.to_bytes().as_slice(),
            &self.public_key_bytes(),
        ))
    }
}

// Debugから鍵材料を漏らさない
impl std::fmt::Debug for Secp256k1Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secp256k1Keypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Ed25519キーペア（ネイティブスキーム）
// ---------------------------------------------------------------------------

/// Ed25519キーペア。チェーンネイティブのスキームで、
/// 一段目のダイジェストに直接署名する（二段目ハッシュは適用しない）。
pub struct Ed25519Keypair {
    signing_key: ed25519_dalek::SigningKey,
}

impl Ed25519Keypair {
    /// 32バイトのシードからキーペアを構築する。
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(secret),
        }
    }

    /// OS乱数で新しいキーペアを生成する。
    pub fn generate() -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng),
        }
    }

    /// 公開鍵（32バイト）を返す。
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// このキーペアのチェーンアドレスを返す。
    pub fn address(&self) -> String {
        derive_address(SignatureScheme::Ed25519, &self.public_key_bytes())
    }

    /// トランザクションバイト列に署名し、直列化署名を返す。
    pub fn sign_transaction(&self, tx_bytes: &[u8]) -> Result<String, CryptoError> {
        let digest = intent_digest(tx_bytes);
        let signature = self.signing_key.sign(&digest);
        Ok(serialize_signature(
            SignatureScheme::Ed25519,
            &signature.to_bytes(),
            &self.public_key_bytes(),
        ))
    }
}

impl std::fmt::Debug for Ed25519Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Keypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
