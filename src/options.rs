//! Request options carried in the query string of the streaming endpoints.

/// Options for the speech synthesis channel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TtsOptions {
    /// Voice model, e.g. `aura-asteria-en`.
    pub model: Option<String>,
    /// Output audio encoding, e.g. `linear16`.
    pub encoding: Option<String>,
    /// Output sample rate in Hz.
    pub sample_rate: Option<u32>,
    /// Output container, e.g. `none` or `wav`.
    pub container: Option<String>,
    /// Output bit rate for compressed encodings.
    pub bit_rate: Option<u32>,
}

impl TtsOptions {
    /// Query pairs for every option that is set.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        push(&mut pairs, "model", self.model.as_ref());
        push(&mut pairs, "encoding", self.encoding.as_ref());
        push(&mut pairs, "sample_rate", self.sample_rate.as_ref());
        push(&mut pairs, "container", self.container.as_ref());
        push(&mut pairs, "bit_rate", self.bit_rate.as_ref());
        pairs
    }
}

/// Options for the transcription channel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SttOptions {
    /// Transcription model, e.g. `nova-2`.
    pub model: Option<String>,
    /// BCP-47 language tag.
    pub language: Option<String>,
    /// Encoding of the audio sent by the client.
    pub encoding: Option<String>,
    /// Sample rate of the audio sent by the client.
    pub sample_rate: Option<u32>,
    /// Channel count of the audio sent by the client.
    pub channels: Option<u16>,
    /// Add punctuation to transcripts.
    pub punctuate: Option<bool>,
    /// Apply smart formatting to transcripts.
    pub smart_format: Option<bool>,
    /// Emit interim (non-final) results.
    pub interim_results: Option<bool>,
    /// Silence in milliseconds that ends an utterance.
    pub endpointing: Option<u32>,
    /// Gap in milliseconds before an utterance-end message.
    pub utterance_end_ms: Option<u32>,
    /// Emit speech-started events.
    pub vad_events: Option<bool>,
    /// Label speakers.
    pub diarize: Option<bool>,
    /// Boosted keywords; each becomes its own query pair.
    pub keywords: Vec<String>,
}

impl SttOptions {
    /// Query pairs for every option that is set.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        push(&mut pairs, "model", self.model.as_ref());
        push(&mut pairs, "language", self.language.as_ref());
        push(&mut pairs, "encoding", self.encoding.as_ref());
        push(&mut pairs, "sample_rate", self.sample_rate.as_ref());
        push(&mut pairs, "channels", self.channels.as_ref());
        push(&mut pairs, "punctuate", self.punctuate.as_ref());
        push(&mut pairs, "smart_format", self.smart_format.as_ref());
        push(&mut pairs, "interim_results", self.interim_results.as_ref());
        push(&mut pairs, "endpointing", self.endpointing.as_ref());
        push(&mut pairs, "utterance_end_ms", self.utterance_end_ms.as_ref());
        push(&mut pairs, "vad_events", self.vad_events.as_ref());
        push(&mut pairs, "diarize", self.diarize.as_ref());
        for keyword in &self.keywords {
            pairs.push(("keywords".to_string(), keyword.clone()));
        }
        pairs
    }
}

fn push<T: ToString>(pairs: &mut Vec<(String, String)>, key: &str, value: Option<&T>) {
    if let Some(value) = value {
        pairs.push((key.to_string(), value.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_options_are_omitted() {
        assert!(TtsOptions::default().query_pairs().is_empty());
        assert!(SttOptions::default().query_pairs().is_empty());
    }

    #[test]
    fn stt_options_map_to_pairs_in_order() {
        let options = SttOptions {
            model: Some("nova-2".to_string()),
            sample_rate: Some(16000),
            interim_results: Some(true),
            keywords: vec!["alpha".to_string(), "beta".to_string()],
            ..Default::default()
        };
        let pairs = options.query_pairs();
        let rendered: Vec<String> = pairs.iter().map(|(k, v)| format!("{k}={v}")).collect();
        assert_eq!(
            rendered,
            vec![
                "model=nova-2",
                "sample_rate=16000",
                "interim_results=true",
                "keywords=alpha",
                "keywords=beta",
            ]
        );
    }

    #[test]
    fn tts_options_map_to_pairs() {
        let options = TtsOptions {
            model: Some("aura-asteria-en".to_string()),
            encoding: Some("linear16".to_string()),
            container: Some("none".to_string()),
            ..Default::default()
        };
        assert_eq!(options.query_pairs().len(), 3);
        assert_eq!(options.query_pairs()[1], ("encoding".to_string(), "linear16".to_string()));
    }
}
