//! # Custody Gateway コア検査
//!
//! 外部で構築されたトランザクションを署名前に検査する。
//!
//! ## 処理フロー
//! 1. ワイヤバイト列を正準コーデックでデコードする
//! 2. 再エンコード結果が元のバイト列と一致することを確認する
//! 3. 引き出し認可ポリシーに照らしてコマンド列を検査する
//!
//! 検査に通らないトランザクションが署名器に渡ることはない。
//! 検査は署名の厳密に手前に置かれ、逆順はありえない。

use custody_types::{Argument, CallArg, ObjectArg, TransactionData};

// ---------------------------------------------------------------------------
// 正準デコード
// ---------------------------------------------------------------------------

/// コーデック境界のエラー型
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// BCSデコード失敗（余剰バイトを含む）
    #[error("トランザクションのデコードに失敗しました: {0}")]
    Decode(String),
    /// BCSエンコード失敗
    #[error("トランザクションのエンコードに失敗しました: {0}")]
    Encode(String),
    /// 再エンコード結果が元のバイト列と一致しない。
    /// 曖昧・非可逆なエンコーディングの兆候であり、デコード形で安全に
    /// 見えても実際に放送されるバイト列が異なりうるため、常にハード失敗。
    #[error("再エンコード結果が元のワイヤバイト列と一致しません")]
    RoundTripMismatch,
}

/// トランザクションを正準バイナリ形式にエンコードする。
pub fn encode_transaction(tx: &TransactionData) -> Result<Vec<u8>, CodecError> {
    bcs::to_bytes(tx).map_err(|e| CodecError::Encode(e.to_string()))
}

/// ワイヤバイト列をデコードし、往復一致を検証して返す。
///
/// `Encode(Decode(x)) == x` がビット単位で成り立たない場合は
/// `RoundTripMismatch` を返す。末尾に余剰バイトがある入力は
/// コーデック自体がデコード失敗として拒否する。
pub fn decode_transaction(bytes: &[u8]) -> Result<TransactionData, CodecError> {
    let tx: TransactionData =
        bcs::from_bytes(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
    let reencoded = encode_transaction(&tx)?;
    if reencoded != bytes {
        return Err(CodecError::RoundTripMismatch);
    }
    Ok(tx)
}

// ---------------------------------------------------------------------------
// 引き出し認可ポリシー
// ---------------------------------------------------------------------------

/// コマンド数の既定上限。スパム的なコマンド列を弾くための閾値で、
/// この値未満のコマンド数のみ許可する。
pub const DEFAULT_MAX_COMMANDS: usize = 10;

/// 引き出し認可ポリシー。
/// グローバル状態は持たず、呼び出し側が明示的に構築して渡す。
#[derive(Debug, Clone)]
pub struct WithdrawPolicy {
    /// 認可モジュール名
    pub module: String,
    /// 認可エントリポイント名
    pub function: String,
    /// コマンド数上限（この値未満のみ許可）
    pub max_commands: usize,
}

impl Default for WithdrawPolicy {
    fn default() -> Self {
        Self {
            module: "gateway".to_string(),
            function: "withdraw_impl".to_string(),
            max_commands: DEFAULT_MAX_COMMANDS,
        }
    }
}

/// 検査失敗の理由。
/// 検査失敗は想定内の制御フローであり、例外的事象ではない。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SanitizeError {
    /// プログラマブルトランザクションではない
    #[error("プログラマブルトランザクションではありません")]
    NotProgrammable,
    /// コマンドが1つもない
    #[error("コマンドがありません")]
    NoCommands,
    /// コマンド数が上限以上
    #[error("コマンド数が上限を超えています: {count} >= {max}")]
    TooManyCommands { count: usize, max: usize },
    /// 先頭コマンドが認可された引き出し呼び出しでない
    #[error("先頭コマンドが認可された引き出し呼び出しではありません")]
    UnauthorizedFirstCommand,
    /// 後続コマンドが所有オブジェクトを参照している
    #[error("後続コマンドが許可されない所有オブジェクトを使用しています: コマンド{command} 入力{input}")]
    DisallowedOwnedObject { command: usize, input: usize },
    /// 入力インデックスが入力一覧の範囲外
    #[error("入力インデックスが範囲外です: コマンド{command} 入力{input}")]
    InputOutOfRange { command: usize, input: usize },
}

/// デコード済みトランザクションをポリシーに照らして検査する。
///
/// 検査内容（この順で評価し、最初の違反で打ち切る）:
/// 1. プログラマブル変種であること
/// 2. コマンドが1つ以上あること
/// 3. コマンド数が上限未満であること
/// 4. 先頭コマンドが `module::function` へのMoveCallであること
/// 5. 2番目以降のコマンドが参照するオブジェクト入力が
///    共有オブジェクト（可変・読み取り専用とも）に限られること
///
/// 先頭コマンドは引き出しケーパビリティ等の所有オブジェクトを
/// 消費してよい。後続コマンドに所有オブジェクトを許すと、
/// 第二のケーパビリティや署名者が動かす意図のない所有資産を
/// 紛れ込ませる余地が生まれる。
pub fn sanitize(tx: &TransactionData, policy: &WithdrawPolicy) -> Result<(), SanitizeError> {
    let ptb = tx.programmable().ok_or(SanitizeError::NotProgrammable)?;

    let count = ptb.commands.len();
    if count == 0 {
        return Err(SanitizeError::NoCommands);
    }
    if count >= policy.max_commands {
        return Err(SanitizeError::TooManyCommands {
            count,
            max: policy.max_commands,
        });
    }

    let first = ptb.commands[0]
        .move_call()
        .ok_or(SanitizeError::UnauthorizedFirstCommand)?;
    if first.module != policy.module || first.function != policy.function {
        return Err(SanitizeError::UnauthorizedFirstCommand);
    }

    for (command_index, command) in ptb.commands.iter().enumerate().skip(1) {
        for argument in command.arguments() {
            let Argument::Input(input_index) = argument else {
                // ガスコインや先行コマンドの結果は入力一覧を参照しない
                continue;
            };
            let input_index = *input_index as usize;
            let input = ptb
                .inputs
                .get(input_index)
                .ok_or(SanitizeError::InputOutOfRange {
                    command: command_index,
                    input: input_index,
                })?;
            match input {
                CallArg::Pure(_) => {}
                CallArg::Object(ObjectArg::SharedObject { .. }) => {}
                // 所有・凍結・受領待ちの参照はワイヤ形式上区別できないため、
                // 後続コマンドでは一括で拒否する（保守側に倒す）
                CallArg::Object(ObjectArg::ImmOrOwnedObject(_))
                | CallArg::Object(ObjectArg::Receiving(_)) => {
                    return Err(SanitizeError::DisallowedOwnedObject {
                        command: command_index,
                        input: input_index,
                    });
                }
            }
        }
    }

    Ok(())
}
