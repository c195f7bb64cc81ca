//! 视觉提取服务 - 业务能力层
//!
//! 只负责"看图找题"能力：提取、审核、修正。不关心页码顺序和重试流程。
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）

use anyhow::{Context, Result};
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::{AuditVerdict, ExtractionResult, PageImage};
use crate::utils::truncate_text;

/// 提取指令
pub const EXTRACTION_INSTRUCTIONS: &str = "找出这一页上的每一道题目（包括题干、选项、配图），\
为每道题给出一个外接框。跨页的题目标记为 partial-item，并给出相同的 correlationId。";

/// 提取结果的 JSON 结构说明
pub const EXTRACTION_SCHEMA: &str = r#"{
  "coordinateSystem": "normalized-1000",
  "regions": [
    {
      "id": "string",
      "correlationId": "string | null（题号，跨页题目保持一致）",
      "kind": "whole-item | partial-item",
      "box": [ymin, xmin, ymax, xmax],
      "confidence": "0-1 之间的小数"
    }
  ]
}"#;

const SYSTEM_MESSAGE: &str = "你是一个专业的试卷版面分析助手，擅长在扫描页面上定位每一道题目。\
坐标使用 0-1000 的归一化坐标，顺序为 [ymin, xmin, ymax, xmax]。\
只返回 JSON，不要返回任何其他内容。";

/// 视觉提取服务接口
#[async_trait]
pub trait VisionService: Send + Sync {
    /// 从页面图片中提取候选区域
    async fn extract(
        &self,
        image: &PageImage,
        instructions: &str,
        schema: &str,
    ) -> Result<ExtractionResult>;

    /// 审核当前区域集合
    async fn audit(&self, image: &PageImage, regions: &ExtractionResult) -> Result<AuditVerdict>;

    /// 根据审核意见修正区域集合
    async fn correct(
        &self,
        image: &PageImage,
        regions: &ExtractionResult,
        feedback: &str,
    ) -> Result<ExtractionResult>;
}

/// 基于 LLM 的视觉服务
pub struct LlmVisionService {
    client: Client<OpenAIConfig>,
    model_name: String,
    code_fence: Regex,
}

impl LlmVisionService {
    /// 创建新的视觉服务
    pub fn new(config: &Config) -> Result<Self> {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Ok(Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            code_fence: Regex::new(r"(?s)```(?:json)?\s*(.*?)```")?,
        })
    }

    /// 通用的 LLM 调用函数（文本 + 一张页面图片）
    ///
    /// # 返回
    /// 返回 LLM 的响应内容（字符串）
    pub async fn send_to_llm(&self, user_message: &str, image: &PageImage) -> Result<String> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!(
            "用户消息长度: {} 字符，页面 {} ({}x{})",
            user_message.len(),
            image.page,
            image.width,
            image.height
        );

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(SYSTEM_MESSAGE)
            .build()?;

        // 使用 Vision API：文本 + 图片
        let content_parts = vec![
            ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: user_message.to_string(),
                },
            ),
            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: image.to_data_url(),
                        detail: Some(ImageDetail::High),
                    },
                },
            ),
        ];

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
            .build()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(0.1)
            .max_tokens(4096u32)
            .build()?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            anyhow::anyhow!("LLM API 调用失败: {}", e)
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("LLM 返回内容为空"))?;

        Ok(content.trim().to_string())
    }

    /// 从回复中解析 JSON（允许被 Markdown 代码块包裹）
    fn parse_reply<T: DeserializeOwned>(&self, response: &str) -> Result<T> {
        let body = self
            .code_fence
            .captures(response)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .unwrap_or(response)
            .trim();

        // 兜底：截取第一个 { 到最后一个 }
        let body = match (body.find('{'), body.rfind('}')) {
            (Some(start), Some(end)) if start < end => &body[start..=end],
            _ => body,
        };

        serde_json::from_str(body)
            .with_context(|| format!("无法解析 LLM 返回的 JSON: {}", truncate_text(response, 120)))
    }
}

#[async_trait]
impl VisionService for LlmVisionService {
    async fn extract(
        &self,
        image: &PageImage,
        instructions: &str,
        schema: &str,
    ) -> Result<ExtractionResult> {
        let user_message = format!(
            "{}\n\n返回格式（JSON）：\n{}\n\n如果这一页没有任何题目，返回 {{\"regions\": []}}。",
            instructions, schema
        );
        let response = self.send_to_llm(&user_message, image).await?;
        self.parse_reply(&response)
    }

    async fn audit(&self, image: &PageImage, regions: &ExtractionResult) -> Result<AuditVerdict> {
        let regions_json = serde_json::to_string_pretty(regions)?;
        let user_message = format!(
            r#"下面是对这一页题目框选的结果，请检查：
- 是否有题目被漏掉
- 是否有框把两道题合在了一起，或把一道题拆开
- 框是否完整覆盖题干、选项和配图

当前结果：
{}

如果没有问题返回 {{"ok": true}}；否则返回 {{"ok": false, "feedback": "具体问题"}}。"#,
            regions_json
        );
        let response = self.send_to_llm(&user_message, image).await?;
        self.parse_reply(&response)
    }

    async fn correct(
        &self,
        image: &PageImage,
        regions: &ExtractionResult,
        feedback: &str,
    ) -> Result<ExtractionResult> {
        let regions_json = serde_json::to_string_pretty(regions)?;
        let user_message = format!(
            "下面的框选结果没有通过审核。\n\n审核意见：{}\n\n原结果：\n{}\n\n\
请根据审核意见给出修正后的完整结果，格式与原结果相同（JSON）：\n{}",
            feedback, regions_json, EXTRACTION_SCHEMA
        );
        let response = self.send_to_llm(&user_message, image).await?;
        self.parse_reply(&response)
    }
}
