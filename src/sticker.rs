use std::path::{Path, PathBuf};

use anyhow::Result;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::StickerConfig;
use crate::emotion::{Emotion, EmotionMap, Intensity, Valence};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

pub const UNKNOWN_INTENT: &str = "未知意图";

/// Intent label → asset directory name inside each pack.
pub const INTENT_DIRECTORIES: &[(&str, &str)] = &[
    ("招呼用语", "zhaohu_yongyu"),
    ("礼貌用语", "limao_yongyu"),
    ("祝福用语", "zhufu_yongyu"),
    ("祝贺用语", "zhuhe_yongyu"),
    ("赞美用语", "zanmei_yongyu"),
    ("结束用语", "jieshu_yongyu"),
    ("请求谅解", "qingqiu_liangjie"),
    ("语气词", "yuqi_ci"),
    ("肯定(好的)", "kending_haode"),
    ("肯定(是的)", "kending_shide"),
    ("肯定(可以)", "kending_keyi"),
    ("肯定(知道了)", "kending_zhidaole"),
    ("肯定(嗯嗯)", "kending_enen"),
    ("肯定(有)", "kending_you"),
    ("肯定(好了)", "kending_haole"),
    ("肯定(正确)", "kending_zhengque"),
    ("否定(不需要)", "fouding_buxuyao"),
    ("否定(不想要)", "fouding_buxiangyao"),
    ("否定(不可以)", "fouding_bukeyi"),
    ("否定(不知道)", "fouding_buzhidao"),
    ("否定(没时间)", "fouding_meishijian"),
    ("否定(没兴趣)", "fouding_meixingqu"),
    ("否定(不方便)", "fouding_bufangbian"),
    ("否定(不是)", "fouding_bushi"),
    ("否定(不清楚)", "fouding_buqingchu"),
    ("否定(不用了)", "fouding_buyongle"),
    ("否定(取消)", "fouding_quxiao"),
    ("否定(错误)", "fouding_cuowu"),
    ("否定答复", "fouding_dafu"),
    ("疑问(时间)", "yiwen_shijian"),
    ("疑问(地址)", "yiwen_dizhi"),
    ("疑问(数值)", "yiwen_shuzhi"),
    ("疑问(时长)", "yiwen_shichang"),
    ("查详细信息", "cha_xiangxi_xinxi"),
    ("查联系方式", "cha_lianxi_fangshi"),
    ("查自我介绍", "cha_ziwo_jieshao"),
    ("查优惠政策", "cha_youhui_zhengce"),
    ("查公司介绍", "cha_gongsi_jieshao"),
    ("查操作流程", "cha_caozuo_liucheng"),
    ("查收费方式", "cha_shoufei_fangshi"),
    ("查物品信息", "cha_wupin_xinxi"),
    ("号码来源", "haoma_laiyuan"),
    ("质疑来电号码", "zhiyi_laidian_haoma"),
    ("问意图", "wen_yitu"),
    ("实体(地址)", "shiti_dizhi"),
    ("答时间", "da_shijian"),
    ("答非所问", "da_feisuowen"),
    ("请等一等", "qing_deng_yideng"),
    ("请讲", "qing_jiang"),
    ("听不清楚", "ting_bu_qingchu"),
    ("你还在吗", "ni_hai_zai_ma"),
    ("我在", "wo_zai"),
    ("未能理解", "weineng_lijie"),
    ("听我说话", "ting_wo_shuohua"),
    ("用户正忙", "yonghu_zhengmang"),
    ("改天再谈", "gaitian_zaitan"),
    ("时间推迟", "shijian_tuichi"),
    ("是否机器人", "shifou_jiqiren"),
    ("要求复述", "yaoqiu_fushu"),
    ("请讲重点", "qing_jiang_zhongdian"),
    ("转人工客服", "zhuan_rengong_kefu"),
    ("投诉警告", "tousu_jinggao"),
    ("不信任", "buxinren"),
    ("价格太高", "jiage_taigao"),
    ("打错电话", "dacuo_dianhua"),
    ("资金困难", "zijin_kunnan"),
    ("遭遇不幸", "zaoyu_buxing"),
    ("骚扰电话", "saorao_dianhua"),
    ("已完成", "yi_wancheng"),
    ("会按时处理", "hui_anshi_chuli"),
];

pub fn intent_directory(intent: &str) -> Option<&'static str> {
    INTENT_DIRECTORIES
        .iter()
        .find(|(label, _)| *label == intent)
        .map(|(_, dir)| *dir)
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntentPrediction {
    pub intent: String,
    pub confidence: f64,
}

pub trait IntentClassifier: Send + Sync {
    fn name(&self) -> &'static str;
    fn predict(&self, text: &str) -> Result<IntentPrediction>;
}

/// Keyword rules used when no trained model is plugged in. First match wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordIntentClassifier;

const KEYWORD_RULES: &[(&[&str], &str, f64)] = &[
    (&["你好", "您好", "hi", "hello"], "招呼用语", 0.95),
    (&["谢谢", "感谢", "多谢"], "礼貌用语", 0.90),
    (&["好的", "可以", "行", "没问题"], "肯定(好的)", 0.85),
    (&["不", "不要", "不用", "不需要"], "否定(不需要)", 0.80),
    (&["什么时候", "几点", "时间"], "疑问(时间)", 0.75),
    (&["在哪", "地址", "位置"], "疑问(地址)", 0.75),
];

impl IntentClassifier for KeywordIntentClassifier {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn predict(&self, text: &str) -> Result<IntentPrediction> {
        let lowered = text.to_lowercase();
        let (intent, confidence) = KEYWORD_RULES
            .iter()
            .find(|(words, _, _)| words.iter().any(|w| lowered.contains(w)))
            .map(|(_, intent, confidence)| (*intent, *confidence))
            .unwrap_or((UNKNOWN_INTENT, 0.30));
        Ok(IntentPrediction {
            intent: intent.to_string(),
            confidence,
        })
    }
}

/// `false` when the mood makes a sticker inappropriate. An empty map allows it.
pub fn emotion_allows_sticker(emotions: &EmotionMap) -> bool {
    if emotions.contains(Emotion::Serious) {
        return false;
    }
    let at_least = |emotion, floor: Intensity| emotions.get(emotion).is_some_and(|i| i >= floor);
    if at_least(Emotion::Sad, Intensity::High)
        || at_least(Emotion::Angry, Intensity::High)
        || at_least(Emotion::Anxious, Intensity::Extreme)
        || at_least(Emotion::Tired, Intensity::Extreme)
    {
        return false;
    }
    let strong_negative = [
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Anxious,
        Emotion::Embarrassed,
    ]
    .into_iter()
    .filter(|e| at_least(*e, Intensity::High))
    .count();
    strong_negative < 2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StickerOutcome {
    Selected,
    NoPacks,
    PacksNotFound,
    EmotionFilter,
    ProbabilityFilter,
    PredictionError,
    LowConfidence,
    NoMapping,
    NoFiles,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StickerLog {
    pub outcome: StickerOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roll: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valence: Option<Valence>,
    #[serde(default)]
    pub candidates: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
}

impl StickerLog {
    fn new(outcome: StickerOutcome) -> Self {
        Self {
            outcome,
            roll: None,
            classifier: None,
            intent: None,
            confidence: None,
            threshold: None,
            valence: None,
            candidates: 0,
            asset: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StickerDecision {
    /// Path relative to the asset root, `pack/intent_dir/file`.
    pub asset: Option<String>,
    pub log: StickerLog,
}

impl StickerDecision {
    fn skip(log: StickerLog) -> Self {
        Self { asset: None, log }
    }
}

pub struct StickerSelector {
    config: StickerConfig,
    classifier: Box<dyn IntentClassifier>,
}

impl std::fmt::Debug for StickerSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StickerSelector")
            .field("config", &self.config)
            .field("classifier", &self.classifier.name())
            .finish()
    }
}

impl StickerSelector {
    pub fn new(config: StickerConfig) -> Self {
        Self::with_classifier(config, Box::new(KeywordIntentClassifier))
    }

    pub fn with_classifier(config: StickerConfig, classifier: Box<dyn IntentClassifier>) -> Self {
        Self { config, classifier }
    }

    pub fn config(&self) -> &StickerConfig {
        &self.config
    }

    pub fn select(&self, text: &str, emotions: &EmotionMap, rng: &mut impl Rng) -> StickerDecision {
        let (root, packs) = match (&self.config.asset_root, self.config.packs.is_empty()) {
            (Some(root), false) => (root, &self.config.packs),
            _ => {
                debug!("no sticker packs configured");
                return StickerDecision::skip(StickerLog::new(StickerOutcome::NoPacks));
            }
        };

        let available: Vec<&String> = packs.iter().filter(|p| root.join(p).is_dir()).collect();
        if available.is_empty() {
            warn!(root = %root.display(), ?packs, "no configured sticker pack exists");
            return StickerDecision::skip(StickerLog::new(StickerOutcome::PacksNotFound));
        }

        if !emotion_allows_sticker(emotions) {
            debug!(?emotions, "sticker blocked by emotion state");
            return StickerDecision::skip(StickerLog::new(StickerOutcome::EmotionFilter));
        }

        let roll: f64 = rng.gen();
        if roll >= self.config.send_probability {
            debug!(roll, p = self.config.send_probability, "sticker blocked by probability roll");
            return StickerDecision::skip(StickerLog {
                roll: Some(roll),
                ..StickerLog::new(StickerOutcome::ProbabilityFilter)
            });
        }

        let mut log = StickerLog {
            roll: Some(roll),
            classifier: Some(self.classifier.name().to_string()),
            ..StickerLog::new(StickerOutcome::PredictionError)
        };
        let prediction = match self.classifier.predict(text) {
            Ok(p) => p,
            Err(err) => {
                warn!(classifier = self.classifier.name(), "intent prediction failed: {err:#}");
                return StickerDecision::skip(log);
            }
        };

        let valence = emotions.valence();
        let threshold = match valence {
            Valence::Positive => self.config.positive_threshold,
            Valence::Neutral => self.config.neutral_threshold,
            Valence::Negative => self.config.negative_threshold,
        };
        log.intent = Some(prediction.intent.clone());
        log.confidence = Some(prediction.confidence);
        log.threshold = Some(threshold);
        log.valence = Some(valence);
        info!(
            intent = %prediction.intent,
            confidence = prediction.confidence,
            threshold,
            "sticker intent predicted"
        );

        if prediction.confidence < threshold {
            log.outcome = StickerOutcome::LowConfidence;
            return StickerDecision::skip(log);
        }

        let Some(dir) = intent_directory(&prediction.intent) else {
            warn!(intent = %prediction.intent, "no asset directory for intent");
            log.outcome = StickerOutcome::NoMapping;
            return StickerDecision::skip(log);
        };

        let files = collect_assets(root, &available, dir);
        log.candidates = files.len();
        let Some(chosen) = files.choose(rng).cloned() else {
            warn!(intent = %prediction.intent, dir, "no sticker files for intent");
            log.outcome = StickerOutcome::NoFiles;
            return StickerDecision::skip(log);
        };

        info!(asset = %chosen, candidates = files.len(), "sticker selected");
        log.outcome = StickerOutcome::Selected;
        log.asset = Some(chosen.clone());
        StickerDecision {
            asset: Some(chosen),
            log,
        }
    }
}

/// Image files under `root/pack/dir` for every pack, sorted so seeded runs
/// pick the same file.
fn collect_assets(root: &Path, packs: &[&String], dir: &str) -> Vec<String> {
    let mut files = Vec::new();
    for pack in packs {
        let intent_dir: PathBuf = root.join(pack).join(dir);
        let Ok(entries) = std::fs::read_dir(&intent_dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if !path.is_file() || !is_image {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                files.push(format!("{pack}/{dir}/{name}"));
            }
        }
    }
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> EmotionMap {
        EmotionMap::normalize(pairs.iter().copied())
    }

    #[test]
    fn keyword_classifier_rules() {
        let c = KeywordIntentClassifier;
        let p = c.predict("Hello there").unwrap();
        assert_eq!((p.intent.as_str(), p.confidence), ("招呼用语", 0.95));
        let p = c.predict("多谢你").unwrap();
        assert_eq!(p.intent, "礼貌用语");
        let p = c.predict("我们几点见").unwrap();
        assert_eq!(p.intent, "疑问(时间)");
        let p = c.predict("嗯嗯").unwrap();
        assert_eq!((p.intent.as_str(), p.confidence), (UNKNOWN_INTENT, 0.30));
    }

    #[test]
    fn every_keyword_intent_has_a_directory() {
        for (_, intent, _) in KEYWORD_RULES {
            assert!(intent_directory(intent).is_some(), "{intent}");
        }
        assert_eq!(intent_directory(UNKNOWN_INTENT), None);
    }

    #[test]
    fn emotion_gate() {
        assert!(emotion_allows_sticker(&EmotionMap::new()));
        assert!(emotion_allows_sticker(&map(&[("happy", "extreme")])));
        assert!(!emotion_allows_sticker(&map(&[("serious", "low")])));
        assert!(!emotion_allows_sticker(&map(&[("sad", "high")])));
        assert!(emotion_allows_sticker(&map(&[("sad", "medium")])));
        assert!(!emotion_allows_sticker(&map(&[("anxious", "extreme")])));
        assert!(emotion_allows_sticker(&map(&[("anxious", "high")])));
        assert!(!emotion_allows_sticker(&map(&[
            ("anxious", "high"),
            ("embarrassed", "high")
        ])));
    }
}
