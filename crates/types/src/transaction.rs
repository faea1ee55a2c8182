//! # プログラマブルトランザクションのデータモデル
//!
//! チェーンの正準BCSレイアウトと列挙子順を揃えたトランザクション構造。
//! シリアライズそのものは外部コーデック（`bcs`クレート）が担い、
//! ここでは`serde`導出によってフィールド順・判別子順のみを定義する。
//!
//! ## 不変条件
//! - 列挙型の判別子順はチェーンのワイヤ形式と一致していること
//!   （順序を変えると `Encode(Decode(x)) == x` が破れる）
//! - `Pure`入力のバイト列は解釈せずそのまま保持すること

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ObjectDigest, ObjectId, SuiAddress, TypesError};

// ---------------------------------------------------------------------------
// トランザクション外殻
// ---------------------------------------------------------------------------

/// トランザクションデータ。現行ワイヤ形式はV1のみ。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionData {
    V1(TransactionDataV1),
}

impl TransactionData {
    /// プログラマブル変種であればその本体を返す。
    pub fn programmable(&self) -> Option<&ProgrammableTransaction> {
        let TransactionData::V1(v1) = self;
        match &v1.kind {
            TransactionKind::ProgrammableTransaction(ptb) => Some(ptb),
            _ => None,
        }
    }
}

/// V1トランザクション本体。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDataV1 {
    /// トランザクション種別
    pub kind: TransactionKind,
    /// 送信者アドレス
    pub sender: SuiAddress,
    /// ガス設定
    pub gas_data: GasData,
    /// 有効期限
    pub expiration: TransactionExpiration,
}

/// トランザクション種別。
///
/// カストディ署名の対象になるのはプログラマブル変種のみ。
/// システムトランザクション各種は判別子位置を占めるマーカーであり、
/// 検査では形状違反として拒否される。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// コマンド列を持つプログラマブルトランザクション
    ProgrammableTransaction(ProgrammableTransaction),
    /// エポック切替（システム専用）
    ChangeEpoch,
    /// ジェネシス（システム専用）
    Genesis,
    /// コンセンサスコミットプロローグ（システム専用）
    ConsensusCommitPrologue,
}

/// ガス設定。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasData {
    /// ガス支払いに使うコインオブジェクト
    pub payment: Vec<ObjectRef>,
    /// ガス所有者
    pub owner: SuiAddress,
    /// ガス単価
    pub price: u64,
    /// ガス予算
    pub budget: u64,
}

/// トランザクション有効期限。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionExpiration {
    /// 無期限
    None,
    /// 指定エポックまで有効
    Epoch(u64),
}

// ---------------------------------------------------------------------------
// プログラマブルトランザクション
// ---------------------------------------------------------------------------

/// プログラマブルトランザクション本体。
/// 入力の並びとコマンドの並びを保持し、コマンドは入力を
/// インデックスで参照する。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgrammableTransaction {
    /// 入力一覧（純粋値またはオブジェクト参照）
    pub inputs: Vec<CallArg>,
    /// コマンド一覧（実行順）
    pub commands: Vec<Command>,
}

/// コマンド入力。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallArg {
    /// BCSエンコード済みの純粋値
    Pure(#[serde(with = "serde_bytes")] Vec<u8>),
    /// オブジェクト参照
    Object(ObjectArg),
}

/// オブジェクト参照の種別。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectArg {
    /// 所有オブジェクトまたは凍結オブジェクト（バージョン・ダイジェスト固定）
    ImmOrOwnedObject(ObjectRef),
    /// 共有オブジェクト。`mutable: false` は読み取り専用アクセス。
    SharedObject {
        /// オブジェクトID
        id: ObjectId,
        /// 共有化された時点のバージョン（現在バージョンではない）
        initial_shared_version: u64,
        /// 可変アクセスを要求するか
        mutable: bool,
    },
    /// 受領待ちオブジェクト（所有者のみ取り込める）
    Receiving(ObjectRef),
}

/// バージョン付きオブジェクト参照。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    /// オブジェクトID
    pub object_id: ObjectId,
    /// バージョン
    pub version: u64,
    /// ダイジェスト
    pub digest: ObjectDigest,
}

/// コマンド。判別子順はワイヤ形式と一致させる。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Move関数呼び出し
    MoveCall(ProgrammableMoveCall),
    /// オブジェクト群を指定アドレスへ移転
    TransferObjects(Vec<Argument>, Argument),
    /// コインを指定量で分割
    SplitCoins(Argument, Vec<Argument>),
    /// コインを統合
    MergeCoins(Argument, Vec<Argument>),
    /// パッケージ公開（モジュールバイト列と依存パッケージ）
    Publish(Vec<Vec<u8>>, Vec<ObjectId>),
    /// Moveベクタの構築
    MakeMoveVec(Option<TypeTag>, Vec<Argument>),
    /// パッケージアップグレード
    Upgrade(Vec<Vec<u8>>, Vec<ObjectId>, ObjectId, Argument),
}

impl Command {
    /// MoveCallであればその本体を返す。
    pub fn move_call(&self) -> Option<&ProgrammableMoveCall> {
        match self {
            Command::MoveCall(call) => Some(call),
            _ => None,
        }
    }

    /// このコマンドが参照する引数の一覧を返す。
    pub fn arguments(&self) -> Vec<&Argument> {
        match self {
            Command::MoveCall(call) => call.arguments.iter().collect(),
            Command::TransferObjects(objects, address) => {
                objects.iter().chain(std::iter::once(address)).collect()
            }
            Command::SplitCoins(coin, amounts) => {
                std::iter::once(coin).chain(amounts.iter()).collect()
            }
            Command::MergeCoins(target, sources) => {
                std::iter::once(target).chain(sources.iter()).collect()
            }
            Command::Publish(_, _) => Vec::new(),
            Command::MakeMoveVec(_, args) => args.iter().collect(),
            Command::Upgrade(_, _, _, ticket) => vec![ticket],
        }
    }
}

/// Move関数呼び出し。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgrammableMoveCall {
    /// パッケージID
    pub package: ObjectId,
    /// モジュール名
    pub module: String,
    /// 関数名
    pub function: String,
    /// 型引数
    pub type_arguments: Vec<TypeTag>,
    /// 引数
    pub arguments: Vec<Argument>,
}

/// コマンド引数。入力または先行コマンドの結果を参照する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Argument {
    /// ガスコイン
    GasCoin,
    /// `inputs[n]` への参照
    Input(u16),
    /// コマンドnの結果への参照
    Result(u16),
    /// コマンドnの第m結果への参照
    NestedResult(u16, u16),
}

// ---------------------------------------------------------------------------
// Move型タグ
// ---------------------------------------------------------------------------

/// Move型タグ。判別子順はワイヤ形式と一致させる
/// （U16/U32/U256は後方互換のため末尾に追加されている）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeTag {
    Bool,
    U8,
    U64,
    U128,
    Address,
    Signer,
    Vector(Box<TypeTag>),
    Struct(Box<StructTag>),
    U16,
    U32,
    U256,
}

/// Move構造体型タグ（例: `0x2::sui::SUI`）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructTag {
    /// パッケージアドレス
    pub address: SuiAddress,
    /// モジュール名
    pub module: String,
    /// 構造体名
    pub name: String,
    /// 型パラメータ
    pub type_params: Vec<TypeTag>,
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Bool => write!(f, "bool"),
            TypeTag::U8 => write!(f, "u8"),
            TypeTag::U16 => write!(f, "u16"),
            TypeTag::U32 => write!(f, "u32"),
            TypeTag::U64 => write!(f, "u64"),
            TypeTag::U128 => write!(f, "u128"),
            TypeTag::U256 => write!(f, "u256"),
            TypeTag::Address => write!(f, "address"),
            TypeTag::Signer => write!(f, "signer"),
            TypeTag::Vector(inner) => write!(f, "vector<{inner}>"),
            TypeTag::Struct(tag) => write!(f, "{tag}"),
        }
    }
}

impl fmt::Display for StructTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.address, self.module, self.name)?;
        if !self.type_params.is_empty() {
            let params: Vec<String> = self.type_params.iter().map(|t| t.to_string()).collect();
            write!(f, "<{}>", params.join(", "))?;
        }
        Ok(())
    }
}

/// 型パラメータ列をネスト深度を考慮してカンマで分割する。
fn split_type_params(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = s[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}

impl FromStr for TypeTag {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "bool" => return Ok(TypeTag::Bool),
            "u8" => return Ok(TypeTag::U8),
            "u16" => return Ok(TypeTag::U16),
            "u32" => return Ok(TypeTag::U32),
            "u64" => return Ok(TypeTag::U64),
            "u128" => return Ok(TypeTag::U128),
            "u256" => return Ok(TypeTag::U256),
            "address" => return Ok(TypeTag::Address),
            "signer" => return Ok(TypeTag::Signer),
            _ => {}
        }
        if let Some(inner) = s.strip_prefix("vector<").and_then(|r| r.strip_suffix('>')) {
            return Ok(TypeTag::Vector(Box::new(inner.parse()?)));
        }
        Ok(TypeTag::Struct(Box::new(s.parse()?)))
    }
}

impl FromStr for StructTag {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // 型パラメータ部を切り出す
        let (head, params) = match s.find('<') {
            Some(pos) => {
                let rest = s[pos..]
                    .strip_prefix('<')
                    .and_then(|r| r.strip_suffix('>'))
                    .ok_or_else(|| TypesError::InvalidTypeTag(s.to_string()))?;
                (&s[..pos], split_type_params(rest))
            }
            None => (s, Vec::new()),
        };

        let mut segments = head.split("::");
        let (address, module, name) = match (segments.next(), segments.next(), segments.next()) {
            (Some(a), Some(m), Some(n)) if segments.next().is_none() && !m.is_empty() && !n.is_empty() => {
                (a, m, n)
            }
            _ => return Err(TypesError::InvalidTypeTag(s.to_string())),
        };

        let type_params = params
            .into_iter()
            .map(TypeTag::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StructTag {
            address: address.parse()?,
            module: module.to_string(),
            name: name.to_string(),
            type_params,
        })
    }
}
