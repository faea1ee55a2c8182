//! # Custody Gateway 送信パイプライン
//!
//! デコード → 往復検証 → 検査 → 署名 → 送信 → 実行結果検証を
//! 1つの契約として束ねる。
//!
//! ## 段階と失敗の扱い
//! | 段階 | 失敗の種別 | 再試行 |
//! |------|----------|-------|
//! | デコード・往復検証 | ハード失敗 | しない |
//! | 検査 | 想定内の拒否 | しない（署名は呼ばれない） |
//! | 署名 | その試行で致命的 | しない（入力が決定論的なため無意味） |
//! | 送信 | トランスポート失敗 | 外部トランスポート層のみ可 |
//! | 実行結果検証 | ハード失敗 | しない |
//!
//! キャンセル境界はネットワーク送信の周りだけに置く。署名は
//! 原子的かつ高速な同期処理であり、途中でキャンセルされることはない。

pub mod rpc;

use std::time::Duration;

use base64::Engine;

use custody_core::{decode_transaction, sanitize, CodecError, SanitizeError, WithdrawPolicy};
use custody_crypto::CryptoError;
use custody_types::{EventRecord, ExecutionOutcome, ExecutionStatus};

/// Base64エンジン（Standard）
fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

// ---------------------------------------------------------------------------
// 署名・送信の境界
// ---------------------------------------------------------------------------

/// インテント署名の境界。
/// 鍵材料を保持し、トランザクションバイト列から直列化署名を作る。
pub trait IntentSigner: Send + Sync {
    /// 署名者のチェーンアドレス
    fn address(&self) -> String;
    /// トランザクションバイト列に署名し、直列化署名（Base64）を返す
    fn sign_transaction(&self, tx_bytes: &[u8]) -> Result<String, CryptoError>;
}

impl IntentSigner for custody_crypto::Secp256k1Keypair {
    fn address(&self) -> String {
        custody_crypto::Secp256k1Keypair::address(self)
    }

    fn sign_transaction(&self, tx_bytes: &[u8]) -> Result<String, CryptoError> {
        custody_crypto::Secp256k1Keypair::sign_transaction(self, tx_bytes)
    }
}

impl IntentSigner for custody_crypto::Ed25519Keypair {
    fn address(&self) -> String {
        custody_crypto::Ed25519Keypair::address(self)
    }

    fn sign_transaction(&self, tx_bytes: &[u8]) -> Result<String, CryptoError> {
        custody_crypto::Ed25519Keypair::sign_transaction(self, tx_bytes)
    }
}

/// トランザクション送信の境界。
/// リトライ方針はトランスポート実装側が持ち、パイプラインは
/// 結果をそのまま受け取る。
#[async_trait::async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// 署名済みトランザクションを送信し、正規化した実行結果を返す
    async fn submit(
        &self,
        tx_bytes_b64: &str,
        signatures: Vec<String>,
    ) -> Result<ExecutionOutcome, SubmitError>;
}

/// 送信トランスポートのエラー型
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// HTTP層の失敗
    #[error("RPCリクエストに失敗しました: {0}")]
    Transport(String),
    /// レスポンスの構造が期待と異なる
    #[error("RPCレスポンスのパースに失敗しました: {0}")]
    InvalidResponse(String),
    /// ノードがJSON-RPCエラーを返した
    #[error("RPCエラー: {0}")]
    Rpc(String),
}

/// 署名して送信する。検査や結果検証は行わない低水準の合成で、
/// 送信コラボレータの結果・エラーをそのまま返す。
/// 外部由来のトランザクションには必ず`SubmissionPipeline`を使うこと。
pub async fn sign_and_submit<S: IntentSigner, C: TransactionSubmitter>(
    signer: &S,
    submitter: &C,
    tx_bytes: &[u8],
) -> Result<ExecutionOutcome, PipelineError> {
    let signature = signer.sign_transaction(tx_bytes)?;
    let outcome = submitter
        .submit(&b64().encode(tx_bytes), vec![signature])
        .await?;
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// 実行結果の意味検証
// ---------------------------------------------------------------------------

/// 呼び出し側が要求した実行内容。
/// ステータスが成功でも、イベントのフィールドがここと食い違えば
/// パイプラインは失敗を報告する（宛先違いの「成功」を成功扱いしない）。
#[derive(Debug, Clone, Default)]
pub struct ExpectedEffects {
    /// 期待する引き出し量
    pub amount: Option<u64>,
    /// 期待する受取人
    pub receiver: Option<String>,
    /// 期待する送信者
    pub sender: Option<String>,
}

/// イベントの構造化フィールドから文字列値を取り出す。
/// チェーンのイベントは数値も文字列で運ぶため、数値はその表記に揃える。
fn event_field(event: &EventRecord, field: &str) -> Option<String> {
    match event.parsed_json.get(field)? {
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// 期待値1件をイベント列と照合する。
/// そのフィールドを持つ最初のイベントの値と比較し、
/// どのイベントにも無ければ不一致として扱う。
fn check_event_field(
    events: &[EventRecord],
    field: &'static str,
    expected: &str,
) -> Result<(), PipelineError> {
    let actual = events.iter().find_map(|e| event_field(e, field));
    match actual {
        Some(actual) if actual == expected => Ok(()),
        Some(actual) => Err(PipelineError::SemanticMismatch {
            field,
            expected: expected.to_string(),
            actual,
        }),
        None => Err(PipelineError::SemanticMismatch {
            field,
            expected: expected.to_string(),
            actual: "(イベントに存在しない)".to_string(),
        }),
    }
}

/// 実行結果を要求内容と照合する。
///
/// amountはイベントに無い場合のみ残高変化にフォールバックする
/// （引き出しフローはイベントを発行しないパスがあるため）。
fn verify_expected_effects(
    outcome: &ExecutionOutcome,
    expected: &ExpectedEffects,
) -> Result<(), PipelineError> {
    if let Some(receiver) = &expected.receiver {
        check_event_field(&outcome.events, "receiver", receiver)?;
    }
    if let Some(sender) = &expected.sender {
        check_event_field(&outcome.events, "sender", sender)?;
    }
    if let Some(amount) = expected.amount {
        let amount_str = amount.to_string();
        let in_events = outcome
            .events
            .iter()
            .any(|e| event_field(e, "amount").is_some());
        if in_events {
            check_event_field(&outcome.events, "amount", &amount_str)?;
        } else {
            let matched = outcome
                .balance_changes
                .iter()
                .any(|change| change.amount == amount as i128);
            if !matched {
                return Err(PipelineError::SemanticMismatch {
                    field: "amount",
                    expected: amount_str,
                    actual: "(一致する残高変化が存在しない)".to_string(),
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 送信パイプライン
// ---------------------------------------------------------------------------

/// 送信の既定タイムアウト
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(60);

/// パイプラインのエラー型。
/// すべて明示的に呼び出し側へ伝播し、握りつぶさない。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// デコード・往復検証の失敗
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// 検査による拒否。署名は行われない。
    #[error("検査で拒否されました: {0}")]
    Rejected(#[from] SanitizeError),
    /// 署名失敗。入力は決定論的なので同一入力での再試行は無意味。
    #[error(transparent)]
    Signing(#[from] CryptoError),
    /// 送信トランスポートの失敗
    #[error(transparent)]
    Submit(#[from] SubmitError),
    /// 送信タイムアウト
    #[error("送信がタイムアウトしました（{0:?}）")]
    Timeout(Duration),
    /// チェーンが実行失敗を報告した
    #[error("トランザクション実行が失敗しました: {0}")]
    ExecutionFailed(String),
    /// ステータスは成功だが実行内容が要求と一致しない
    #[error("実行結果が要求と一致しません: {field} 期待={expected} 実際={actual}")]
    SemanticMismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },
}

/// 送信パイプライン。
/// 鍵材料以外の可変状態を持たず、複数の送信を並行に処理できる。
pub struct SubmissionPipeline<S, C> {
    signer: S,
    submitter: C,
    policy: WithdrawPolicy,
    submit_timeout: Duration,
}

impl<S: IntentSigner, C: TransactionSubmitter> SubmissionPipeline<S, C> {
    pub fn new(signer: S, submitter: C, policy: WithdrawPolicy) -> Self {
        Self {
            signer,
            submitter,
            policy,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
        }
    }

    /// 送信タイムアウトを変更する。
    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    /// 署名者のチェーンアドレス
    pub fn signer_address(&self) -> String {
        self.signer.address()
    }

    /// トランザクションを検査・署名・送信し、実行結果を検証して返す。
    ///
    /// 各段階の失敗はその送信にとって終端的で、ここでは再試行しない。
    /// 検査失敗・意味不一致は取り消せない副作用（署名・放送）より
    /// 必ず手前で発生する。
    pub async fn submit(
        &self,
        tx_bytes: &[u8],
        expected: &ExpectedEffects,
    ) -> Result<ExecutionOutcome, PipelineError> {
        // 1. デコード + 往復一致検証
        let tx = decode_transaction(tx_bytes)?;

        // 2. 引き出し認可ポリシーの検査
        sanitize(&tx, &self.policy)?;
        tracing::debug!(
            commands = tx.programmable().map(|p| p.commands.len()).unwrap_or(0),
            "検査を通過しました"
        );

        // 3. 署名（同期・キャンセル境界の外）
        let signature = self.signer.sign_transaction(tx_bytes)?;

        // 4. 送信（タイムアウト付き）
        let tx_bytes_b64 = b64().encode(tx_bytes);
        let outcome = tokio::time::timeout(
            self.submit_timeout,
            self.submitter.submit(&tx_bytes_b64, vec![signature]),
        )
        .await
        .map_err(|_| PipelineError::Timeout(self.submit_timeout))??;

        // 5. 実行ステータスの確認
        match &outcome.status {
            ExecutionStatus::Success => {}
            ExecutionStatus::Failure { error } => {
                return Err(PipelineError::ExecutionFailed(error.clone()));
            }
        }

        // 6. 実行内容の意味検証
        verify_expected_effects(&outcome, expected)?;

        tracing::info!(digest = %outcome.digest, "トランザクション送信が完了しました");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use custody_core::encode_transaction;
    use custody_types::{
        Argument, CallArg, Command, GasData, ObjectArg, ObjectDigest, ObjectId, ObjectRef,
        ProgrammableMoveCall, ProgrammableTransaction, SuiAddress, TransactionData,
        TransactionDataV1, TransactionExpiration, TransactionKind,
    };

    /// 署名呼び出し回数を数えるフェイク署名器
    struct CountingSigner {
        calls: Arc<AtomicUsize>,
    }

    impl IntentSigner for CountingSigner {
        fn address(&self) -> String {
            "0xfake".to_string()
        }

        fn sign_transaction(&self, _tx_bytes: &[u8]) -> Result<String, CryptoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("AAAA".to_string())
        }
    }

    /// 固定の実行結果を返すフェイク送信器
    struct StaticSubmitter {
        outcome: ExecutionOutcome,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl TransactionSubmitter for StaticSubmitter {
        async fn submit(
            &self,
            _tx_bytes_b64: &str,
            _signatures: Vec<String>,
        ) -> Result<ExecutionOutcome, SubmitError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.outcome.clone())
        }
    }

    fn success_outcome(events: Vec<EventRecord>) -> ExecutionOutcome {
        ExecutionOutcome {
            digest: "11111111111111111111111111111111".to_string(),
            status: ExecutionStatus::Success,
            events,
            balance_changes: vec![],
        }
    }

    /// 正当な引き出しPTBのワイヤバイト列を構築する
    fn withdraw_tx_bytes(function: &str) -> Vec<u8> {
        let tx = TransactionData::V1(TransactionDataV1 {
            kind: TransactionKind::ProgrammableTransaction(ProgrammableTransaction {
                inputs: vec![
                    CallArg::Object(ObjectArg::SharedObject {
                        id: ObjectId([1; 32]),
                        initial_shared_version: 3,
                        mutable: true,
                    }),
                    CallArg::Pure(vec![0x39, 0x05, 0, 0, 0, 0, 0, 0]),
                    CallArg::Pure([0xee; 32].to_vec()),
                    CallArg::Object(ObjectArg::ImmOrOwnedObject(ObjectRef {
                        object_id: ObjectId([9; 32]),
                        version: 9,
                        digest: ObjectDigest([9; 32]),
                    })),
                ],
                commands: vec![
                    Command::MoveCall(ProgrammableMoveCall {
                        package: ObjectId([0xaa; 32]),
                        module: "gateway".to_string(),
                        function: function.to_string(),
                        type_arguments: vec![],
                        arguments: vec![
                            Argument::Input(0),
                            Argument::Input(1),
                            Argument::Input(3),
                        ],
                    }),
                    Command::TransferObjects(
                        vec![Argument::NestedResult(0, 0)],
                        Argument::Input(2),
                    ),
                ],
            }),
            sender: SuiAddress([0x11; 32]),
            gas_data: GasData {
                payment: vec![ObjectRef {
                    object_id: ObjectId([5; 32]),
                    version: 5,
                    digest: ObjectDigest([5; 32]),
                }],
                owner: SuiAddress([0x11; 32]),
                price: 1000,
                budget: 5_000_000,
            },
            expiration: TransactionExpiration::None,
        });
        encode_transaction(&tx).unwrap()
    }

    fn pipeline(
        outcome: ExecutionOutcome,
    ) -> (
        SubmissionPipeline<CountingSigner, StaticSubmitter>,
        Arc<AtomicUsize>,
        Arc<AtomicUsize>,
    ) {
        let sign_calls = Arc::new(AtomicUsize::new(0));
        let submit_calls = Arc::new(AtomicUsize::new(0));
        let pipeline = SubmissionPipeline::new(
            CountingSigner {
                calls: sign_calls.clone(),
            },
            StaticSubmitter {
                outcome,
                calls: submit_calls.clone(),
            },
            WithdrawPolicy::default(),
        );
        (pipeline, sign_calls, submit_calls)
    }

    #[tokio::test]
    async fn test_submit_success() {
        let (pipeline, sign_calls, submit_calls) = pipeline(success_outcome(vec![]));
        let outcome = pipeline
            .submit(&withdraw_tx_bytes("withdraw_impl"), &ExpectedEffects::default())
            .await
            .unwrap();
        assert!(outcome.status.is_success());
        assert_eq!(sign_calls.load(Ordering::SeqCst), 1);
        assert_eq!(submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sanitize_failure_prevents_signing() {
        // 検査で拒否された場合、署名器も送信器も呼ばれてはならない
        let (pipeline, sign_calls, submit_calls) = pipeline(success_outcome(vec![]));
        let result = pipeline
            .submit(&withdraw_tx_bytes("deposit"), &ExpectedEffects::default())
            .await;
        assert!(matches!(
            result,
            Err(PipelineError::Rejected(
                SanitizeError::UnauthorizedFirstCommand
            ))
        ));
        assert_eq!(sign_calls.load(Ordering::SeqCst), 0);
        assert_eq!(submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_decode_failure_prevents_signing() {
        let (pipeline, sign_calls, _) = pipeline(success_outcome(vec![]));
        let result = pipeline
            .submit(&[0xde, 0xad, 0xbe, 0xef], &ExpectedEffects::default())
            .await;
        assert!(matches!(result, Err(PipelineError::Codec(_))));
        assert_eq!(sign_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_execution_failure_reported() {
        let outcome = ExecutionOutcome {
            digest: "11111111111111111111111111111111".to_string(),
            status: ExecutionStatus::Failure {
                error: "MoveAbort(7)".to_string(),
            },
            events: vec![],
            balance_changes: vec![],
        };
        let (pipeline, _, _) = pipeline(outcome);
        let result = pipeline
            .submit(&withdraw_tx_bytes("withdraw_impl"), &ExpectedEffects::default())
            .await;
        assert!(matches!(result, Err(PipelineError::ExecutionFailed(e)) if e.contains("MoveAbort")));
    }

    #[tokio::test]
    async fn test_semantic_mismatch_on_receiver() {
        // ステータスは成功でもreceiverが要求と異なれば失敗として報告する
        let event = EventRecord {
            event_type: "0xaa::gateway::WithdrawEvent".to_string(),
            parsed_json: serde_json::json!({
                "amount": "1337",
                "receiver": "0x9999",
            }),
        };
        let (pipeline, _, _) = pipeline(success_outcome(vec![event]));
        let expected = ExpectedEffects {
            receiver: Some("0x1234".to_string()),
            ..Default::default()
        };
        let result = pipeline
            .submit(&withdraw_tx_bytes("withdraw_impl"), &expected)
            .await;
        match result {
            Err(PipelineError::SemanticMismatch {
                field,
                expected,
                actual,
            }) => {
                assert_eq!(field, "receiver");
                assert_eq!(expected, "0x1234");
                assert_eq!(actual, "0x9999");
            }
            other => panic!("意味不一致が期待される: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_semantic_match_passes() {
        let event = EventRecord {
            event_type: "0xaa::gateway::WithdrawEvent".to_string(),
            parsed_json: serde_json::json!({
                "amount": "1337",
                "receiver": "0x1234",
                "sender": "0xabcd",
            }),
        };
        let (pipeline, _, _) = pipeline(success_outcome(vec![event]));
        let expected = ExpectedEffects {
            amount: Some(1337),
            receiver: Some("0x1234".to_string()),
            sender: Some("0xabcd".to_string()),
        };
        let outcome = pipeline
            .submit(&withdraw_tx_bytes("withdraw_impl"), &expected)
            .await
            .unwrap();
        assert!(outcome.status.is_success());
    }

    #[tokio::test]
    async fn test_amount_falls_back_to_balance_changes() {
        // イベントがamountを運ばない場合は残高変化で照合する
        let mut outcome = success_outcome(vec![]);
        outcome.balance_changes = vec![custody_types::BalanceChange {
            owner: SuiAddress([0xee; 32]),
            coin_type: "0x2::sui::SUI".to_string(),
            amount: 1337,
        }];
        let (pipe, _, _) = pipeline(outcome);
        let expected = ExpectedEffects {
            amount: Some(1337),
            ..Default::default()
        };
        assert!(pipe
            .submit(&withdraw_tx_bytes("withdraw_impl"), &expected)
            .await
            .is_ok());

        // 一致する残高変化が無ければ失敗
        let mut outcome = success_outcome(vec![]);
        outcome.balance_changes = vec![custody_types::BalanceChange {
            owner: SuiAddress([0xee; 32]),
            coin_type: "0x2::sui::SUI".to_string(),
            amount: 42,
        }];
        let (pipe, _, _) = pipeline(outcome);
        let result = pipe
            .submit(&withdraw_tx_bytes("withdraw_impl"), &expected)
            .await;
        assert!(matches!(
            result,
            Err(PipelineError::SemanticMismatch { field: "amount", .. })
        ));
    }

    #[tokio::test]
    async fn test_sign_and_submit_passthrough() {
        // 低水準の合成は検査を挟まず、送信結果をそのまま返す
        let sign_calls = Arc::new(AtomicUsize::new(0));
        let submit_calls = Arc::new(AtomicUsize::new(0));
        let signer = CountingSigner {
            calls: sign_calls.clone(),
        };
        let submitter = StaticSubmitter {
            outcome: success_outcome(vec![]),
            calls: submit_calls.clone(),
        };
        let outcome = sign_and_submit(&signer, &submitter, b"arbitrary bytes")
            .await
            .unwrap();
        assert!(outcome.status.is_success());
        assert_eq!(sign_calls.load(Ordering::SeqCst), 1);
        assert_eq!(submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_submit_timeout() {
        /// 応答しない送信器
        struct HangingSubmitter;

        #[async_trait::async_trait]
        impl TransactionSubmitter for HangingSubmitter {
            async fn submit(
                &self,
                _tx_bytes_b64: &str,
                _signatures: Vec<String>,
            ) -> Result<ExecutionOutcome, SubmitError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!()
            }
        }

        let pipeline = SubmissionPipeline::new(
            CountingSigner {
                calls: Arc::new(AtomicUsize::new(0)),
            },
            HangingSubmitter,
            WithdrawPolicy::default(),
        )
        .with_submit_timeout(Duration::from_millis(50));

        let result = pipeline
            .submit(&withdraw_tx_bytes("withdraw_impl"), &ExpectedEffects::default())
            .await;
        assert!(matches!(result, Err(PipelineError::Timeout(_))));
    }
}
