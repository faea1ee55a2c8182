//! # JSON-RPCチェーンクライアント
//!
//! ノードのJSON-RPCエンドポイントに対する薄いクライアント。
//! 送信（`sui_executeTransactionBlock`）と所有オブジェクトの
//! 型付き問い合わせ（`suix_getOwnedObjects`）のみを扱う。
//! リトライ方針は持たない（呼び出し側トランスポートの責務）。

use serde_json::{json, Value};

use custody_types::{
    BalanceChange, EventRecord, ExecutionOutcome, ExecutionStatus, ObjectDigest, ObjectId,
    OwnedObjectInfo, OwnedObjectRequest, StructTag,
};

use crate::{SubmitError, TransactionSubmitter};

/// JSON-RPCクライアント。
pub struct RpcClient {
    http: reqwest::Client,
    endpoint: String,
}

impl RpcClient {
    /// エンドポイントURLからクライアントを構築する。
    pub fn new(endpoint: impl Into<String>) -> Result<Self, SubmitError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| SubmitError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    /// JSON-RPC呼び出しを行い、`result` フィールドを返す。
    async fn call(&self, method: &str, params: Value) -> Result<Value, SubmitError> {
        let body = rpc_request(method, params);
        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| SubmitError::Transport(e.to_string()))?;
        let payload: Value = response
            .json()
            .await
            .map_err(|e| SubmitError::InvalidResponse(e.to_string()))?;
        if let Some(error) = payload.get("error") {
            return Err(SubmitError::Rpc(error.to_string()));
        }
        payload
            .get("result")
            .cloned()
            .ok_or_else(|| SubmitError::InvalidResponse("resultがありません".to_string()))
    }

    /// 所有オブジェクトを型タグで絞り込んで取得する。
    ///
    /// フィルタは型付きリクエストから構築し、ノードが返した各項目の
    /// 型タグを構造的に照合して一致するものだけを返す。
    pub async fn owned_objects(
        &self,
        request: &OwnedObjectRequest,
    ) -> Result<Vec<OwnedObjectInfo>, SubmitError> {
        let params = owned_objects_params(request);
        let result = self.call("suix_getOwnedObjects", params).await?;
        parse_owned_page(&result, &request.type_tag)
    }
}

#[async_trait::async_trait]
impl TransactionSubmitter for RpcClient {
    async fn submit(
        &self,
        tx_bytes_b64: &str,
        signatures: Vec<String>,
    ) -> Result<ExecutionOutcome, SubmitError> {
        let params = json!([
            tx_bytes_b64,
            signatures,
            {
                "showEffects": true,
                "showEvents": true,
                "showBalanceChanges": true,
            },
            "WaitForLocalExecution",
        ]);
        let result = self.call("sui_executeTransactionBlock", params).await?;
        parse_outcome(&result)
    }
}

// ---------------------------------------------------------------------------
// リクエスト構築・レスポンス正規化
// ---------------------------------------------------------------------------

/// JSON-RPCリクエスト本体を構築する。
fn rpc_request(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    })
}

/// 所有オブジェクト問い合わせのパラメータを構築する。
fn owned_objects_params(request: &OwnedObjectRequest) -> Value {
    json!([
        request.owner.to_string(),
        {
            "filter": { "StructType": request.type_tag.to_string() },
            "options": { "showType": true },
        },
        Value::Null,
        request.limit,
    ])
}

/// 文字列または数値のJSONフィールドをu64として読む。
/// ノードはバージョン等のu64を文字列で運ぶことがある。
fn read_u64(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// 実行レスポンスを正規化する。
fn parse_outcome(result: &Value) -> Result<ExecutionOutcome, SubmitError> {
    let digest = result
        .get("digest")
        .and_then(Value::as_str)
        .ok_or_else(|| SubmitError::InvalidResponse("digestがありません".to_string()))?
        .to_string();

    let status_value = result
        .pointer("/effects/status/status")
        .and_then(Value::as_str)
        .ok_or_else(|| SubmitError::InvalidResponse("effects.statusがありません".to_string()))?;
    let status = match status_value {
        "success" => ExecutionStatus::Success,
        _ => ExecutionStatus::Failure {
            error: result
                .pointer("/effects/status/error")
                .and_then(Value::as_str)
                .unwrap_or("不明なエラー")
                .to_string(),
        },
    };

    let events = result
        .get("events")
        .and_then(Value::as_array)
        .map(|events| {
            events
                .iter()
                .map(|event| EventRecord {
                    event_type: event
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    parsed_json: event.get("parsedJson").cloned().unwrap_or(Value::Null),
                })
                .collect()
        })
        .unwrap_or_default();

    // AddressOwner以外の所有者（共有化・オブジェクト所有）は
    // 意味検証の対象外なので読み飛ばす
    let balance_changes = result
        .get("balanceChanges")
        .and_then(Value::as_array)
        .map(|changes| {
            changes
                .iter()
                .filter_map(|change| {
                    let owner = change
                        .pointer("/owner/AddressOwner")
                        .and_then(Value::as_str)?
                        .parse()
                        .ok()?;
                    Some(BalanceChange {
                        owner,
                        coin_type: change
                            .get("coinType")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        amount: change
                            .get("amount")
                            .and_then(Value::as_str)
                            .and_then(|s| s.parse().ok())?,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ExecutionOutcome {
        digest,
        status,
        events,
        balance_changes,
    })
}

/// 所有オブジェクトページを正規化する。
/// 型タグが構造的に一致しない項目は除外する（短縮アドレス表記の
/// 揺れはパース後の比較で吸収される）。
fn parse_owned_page(
    result: &Value,
    expected: &StructTag,
) -> Result<Vec<OwnedObjectInfo>, SubmitError> {
    let items = result
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| SubmitError::InvalidResponse("dataがありません".to_string()))?;

    let mut infos = Vec::new();
    for item in items {
        let Some(data) = item.get("data") else {
            continue;
        };
        let Some(type_str) = data.get("type").and_then(Value::as_str) else {
            continue;
        };
        let Ok(type_tag) = type_str.parse::<StructTag>() else {
            continue;
        };
        if type_tag != *expected {
            continue;
        }

        let object_id: ObjectId = data
            .get("objectId")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| SubmitError::InvalidResponse("objectIdが不正です".to_string()))?;
        let version = data
            .get("version")
            .and_then(read_u64)
            .ok_or_else(|| SubmitError::InvalidResponse("versionが不正です".to_string()))?;
        let digest = data
            .get("digest")
            .and_then(Value::as_str)
            .and_then(|s| ObjectDigest::from_base58(s).ok())
            .ok_or_else(|| SubmitError::InvalidResponse("digestが不正です".to_string()))?;

        infos.push(OwnedObjectInfo {
            object_id,
            version,
            digest,
            type_tag,
        });
    }
    Ok(infos)
}
