use serde::{Deserialize, Serialize};

use crate::models::PlanSubmission;

pub const NIH_DMS_PREAMBLE: &str = "Here is a policy from a government agency, paired with a data management plan | \
    GOVERNMENT POLICY: All plans must include: 1) Data Type: Describe the data to be \
    managed, preserved, and shared, including: summary of the types/estimated amount of \
    scientific data. Descriptions may indicate modality (e.g., imaging, genomic, mobile, \
    survey), level of aggregation (e.g., individual, aggregated, summarized), and/or degree \
    of data processing. Describe which scientific data will be preserved and shared. Provide \
    rationale for these decisions based on ethical, legal, and technical factors. Include \
    brief listing of metadata, other relevant data, and associated documentation (e.g., \
    study protocols and data collection instruments) that will be made available. Indicate \
    what specialized tools are needed to access/manipulate data. If applicable, specify \
    whether tools are free, available from the marketplace, or only available from the \
    research team. Indicate whether such tools are likely to remain available for as long as \
    the data are available. 2) Standards: Indicate what standards will apply to \
    data/metadata (i.e., formats, dictionaries, identifiers, definitions, unique \
    identifiers, other documentation). 3) Data Preservation, Access, and Associated \
    Timelines, including: Name of repositories where scientific data/metadata will be \
    archived; How data will be findable/identifiable, i.e., via persistent unique \
    identifiers or standard indexing tools; When data will be available and for how long. \
    Data should be shared ASAP, and no later than time of an associated publication or end \
    of performance period, whichever comes first. Data should be available for as long as \
    would be useful. Identify any differences in timelines for different subsets of data. 4) \
    Access, Distribution, or Reuse Considerations: Researchers should maximize the \
    appropriate sharing of data. Describe applicable factors affecting subsequent access, \
    distribution, or reuse of scientific data related to: Informed consent (e.g., \
    disease-specific limitations, particular communities’ concerns); Privacy/confidentiality \
    protections (i.e., de-identification, Certificates of Confidentiality, other protective \
    measures) consistent with federal, Tribal, state, and local laws, regulations, and \
    policies; Whether access to data derived from humans will be controlled (i.e., made \
    available only after approval); Any restrictions imposed by federal, Tribal, or state \
    laws, regulations, or policies, or existing/anticipated agreements (e.g., with third \
    party funders, partners, HIPAA-covered, through licensing limitations); Any other \
    considerations that limit extent of data sharing. 5) Oversight of Data Management and \
    Sharing: Indicate how compliance with the Plan will be monitored and managed, frequency \
    of oversight, and by whom (e.g., titles, roles). NOTE: Scientific data do not include \
    laboratory notebooks, preliminary analyses, completed case report forms, drafts of \
    scientific papers, plans for future research, peer reviews, communications with \
    colleagues, or physical objects, such as laboratory specimens. | Determine whether the \
    following data management plan adheres to the government policy, and explain why or why \
    not. | DATA MANAGEMENT PLAN: ";

pub const NIH_DMS_CLOSING_QUESTION: &str =
    "| Does this Data Management & Sharing plan follow the government policy? Why or why not?: ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileLink {
    pub label: String,
    pub url: String,
}

/// Everything that distinguishes one checker page from another: the
/// policy text wrapped around the submission plus the page chrome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyProfile {
    pub title: String,
    pub preamble: String,
    pub closing_question: String,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub links: Vec<ProfileLink>,
}

impl Default for PolicyProfile {
    fn default() -> Self {
        Self::nih_dms()
    }
}

impl PolicyProfile {
    pub fn nih_dms() -> Self {
        Self {
            title: "NIH Data Management & Sharing Plan Checker".to_string(),
            preamble: NIH_DMS_PREAMBLE.to_string(),
            closing_question: NIH_DMS_CLOSING_QUESTION.to_string(),
            contact_email: None,
            links: vec![ProfileLink {
                label: "NIH Data Management & Sharing policy".to_string(),
                url: "https://sharing.nih.gov/data-management-and-sharing-policy".to_string(),
            }],
        }
    }

    /// Wraps the submission between the preamble and the closing
    /// question. No trimming, escaping or truncation is applied.
    pub fn build_envelope(&self, submission: &PlanSubmission) -> PromptEnvelope {
        PromptEnvelope(format!(
            "{} {} {}",
            self.preamble, submission.text, self.closing_question
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptEnvelope(String);

impl PromptEnvelope {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}
