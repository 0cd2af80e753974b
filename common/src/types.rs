use serde::{Deserialize, Serialize};
use std::fmt;

/// 合规状态
///
/// 每个处理周期由检测适配器根据模型标签归一化得到。
/// 序列化字符串与前端页面显示的文本保持一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ComplianceStatus {
    /// 画面中没有人员
    #[default]
    #[serde(rename = "No detection")]
    NoDetection,
    /// 人员佩戴了防护装备
    #[serde(rename = "PPE complied")]
    Compliant,
    /// 缺少防护装备
    #[serde(rename = "PPE not complied")]
    NonCompliant,
    /// 有人员但无法判断
    #[serde(rename = "Inconclusive")]
    Inconclusive,
}

impl ComplianceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceStatus::NoDetection => "No detection",
            ComplianceStatus::Compliant => "PPE complied",
            ComplianceStatus::NonCompliant => "PPE not complied",
            ComplianceStatus::Inconclusive => "Inconclusive",
        }
    }

    /// 是否为违规状态
    pub fn is_violation(&self) -> bool {
        *self == ComplianceStatus::NonCompliant
    }
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
