//! # Custody Gateway 共有型定義
//!
//! チェーンに面するデータ構造をRust構造体として提供する。
//!
//! ## エンコーディング規則
//! - Hex（`0x`プレフィックス付き）: アドレス、オブジェクトID
//! - Base58: オブジェクトダイジェスト、トランザクションダイジェスト
//! - BCS: トランザクションの正準バイナリ表現（外部コーデックが担当）

pub mod transaction;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use base58::{FromBase58, ToBase58};

pub use transaction::{
    Argument, CallArg, Command, GasData, ObjectArg, ObjectRef, ProgrammableMoveCall,
    ProgrammableTransaction, StructTag, TransactionData, TransactionDataV1,
    TransactionExpiration, TransactionKind, TypeTag,
};

/// 共有型のエラー型
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    /// hexデコード失敗
    #[error("hex文字列のデコードに失敗しました: {0}")]
    InvalidHex(String),
    /// バイト長不正（アドレス・ID・ダイジェストは32バイト固定）
    #[error("32バイトの値が必要です: {0}バイト")]
    InvalidLength(usize),
    /// Base58デコード失敗
    #[error("Base58文字列のデコードに失敗しました: {0}")]
    InvalidBase58(String),
    /// 型タグのパース失敗
    #[error("型タグのパースに失敗しました: {0}")]
    InvalidTypeTag(String),
}

/// `0x`プレフィックスを除去し、左ゼロ詰めで32バイトにデコードする。
/// チェーンの慣例に従い `0x2` のような短縮表記も受け付ける。
fn parse_hex_32(s: &str) -> Result<[u8; 32], TypesError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    if stripped.is_empty() || stripped.len() > 64 {
        return Err(TypesError::InvalidHex(s.to_string()));
    }
    // 奇数桁は先頭にゼロを補う
    let padded = if stripped.len() % 2 == 1 {
        format!("0{stripped}")
    } else {
        stripped.to_string()
    };
    let bytes = hex::decode(&padded).map_err(|e| TypesError::InvalidHex(e.to_string()))?;
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

// ---------------------------------------------------------------------------
// アドレス・オブジェクトID・ダイジェスト
// ---------------------------------------------------------------------------

/// チェーンアドレス（32バイト）。
/// 署名スキームフラグと圧縮公開鍵のダイジェストとして導出される。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SuiAddress(pub [u8; 32]);

impl SuiAddress {
    /// 全ゼロのアドレス
    pub const ZERO: SuiAddress = SuiAddress([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for SuiAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for SuiAddress {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(SuiAddress(parse_hex_32(s)?))
    }
}

/// オブジェクトID（32バイト）。アドレスと同じ導出空間を持つ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub [u8; 32]);

impl ObjectId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for ObjectId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ObjectId(parse_hex_32(s)?))
    }
}

/// オブジェクトダイジェスト（32バイト）。
/// RPC境界ではBase58でエンコードされる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectDigest(pub [u8; 32]);

impl ObjectDigest {
    /// Base58文字列からデコードする。
    pub fn from_base58(s: &str) -> Result<Self, TypesError> {
        let bytes = s
            .from_base58()
            .map_err(|e| TypesError::InvalidBase58(format!("{e:?}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| TypesError::InvalidLength(v.len()))?;
        Ok(ObjectDigest(arr))
    }
}

impl fmt::Display for ObjectDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_base58())
    }
}

// ---------------------------------------------------------------------------
// 実行結果（RPCレスポンスの正規化形）
// ---------------------------------------------------------------------------

/// トランザクション実行ステータス。
/// チェーンが報告する成功/失敗のみを保持し、失敗時は理由文字列を伴う。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// 実行成功
    Success,
    /// 実行失敗（Moveアボート、ガス不足等）
    Failure {
        /// チェーンが報告したエラー内容
        error: String,
    },
}

impl ExecutionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Success)
    }
}

/// 発行されたイベント。
/// `parsed_json` はMoveイベント構造体のフィールドをそのまま保持する
/// （amount・receiver等の意味検証はパイプライン側で行う）。
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// イベント型（例: `0x..::gateway::WithdrawEvent`）
    pub event_type: String,
    /// 構造化フィールド
    pub parsed_json: serde_json::Value,
}

/// 残高変化。
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceChange {
    /// 残高が変化したアドレス
    pub owner: SuiAddress,
    /// コイン型（例: `0x2::sui::SUI`）
    pub coin_type: String,
    /// 変化量（減少は負値）
    pub amount: i128,
}

/// トランザクション実行結果。
/// 送信クライアントがRPCレスポンスから正規化して構築する。
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    /// トランザクションダイジェスト（Base58）
    pub digest: String,
    /// 実行ステータス
    pub status: ExecutionStatus,
    /// 発行されたイベント一覧
    pub events: Vec<EventRecord>,
    /// 残高変化一覧
    pub balance_changes: Vec<BalanceChange>,
}

// ---------------------------------------------------------------------------
// 所有オブジェクト問い合わせ
// ---------------------------------------------------------------------------

/// 所有オブジェクトの型付き問い合わせ。
/// フィルタは明示的な型タグで指定する（文字列キーのマップは使わない）。
#[derive(Debug, Clone)]
pub struct OwnedObjectRequest {
    /// 対象アドレス
    pub owner: SuiAddress,
    /// 絞り込む構造体型
    pub type_tag: StructTag,
    /// 最大取得件数（Noneはノードのデフォルト）
    pub limit: Option<u32>,
}

/// 所有オブジェクト問い合わせの結果1件。
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedObjectInfo {
    /// オブジェクトID
    pub object_id: ObjectId,
    /// バージョン
    pub version: u64,
    /// ダイジェスト
    pub digest: ObjectDigest,
    /// オブジェクトの構造体型
    pub type_tag: StructTag,
}
