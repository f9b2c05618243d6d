use crate::domain::ReportType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use strum::{Display, EnumString};
use uuid::Uuid;

pub type AnalysisParameters = Map<String, Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnalysisKind {
    Strategy,
    Market,
    Financial,
    Operations,
}

impl AnalysisKind {
    pub fn report_type(self) -> ReportType {
        match self {
            AnalysisKind::Strategy => ReportType::Strategy,
            AnalysisKind::Market => ReportType::Market,
            AnalysisKind::Financial => ReportType::Financial,
            AnalysisKind::Operations => ReportType::Operations,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AnalysisKind::Strategy => "Strategic Analysis",
            AnalysisKind::Market => "Market Intelligence",
            AnalysisKind::Financial => "Financial Analysis",
            AnalysisKind::Operations => "Operations Analysis",
        }
    }

    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            AnalysisKind::Strategy => &["industry", "coreChallenge"],
            AnalysisKind::Market => &["company", "industry", "analysisType"],
            AnalysisKind::Financial => &["company", "analysisType", "financialPeriod"],
            AnalysisKind::Operations => &["company", "department", "analysisType"],
        }
    }

    /// Analysis types offered for this kind, served before a run so clients
    /// can populate `analysisType`.
    pub fn analysis_types(self) -> &'static [AnalysisOption] {
        match self {
            AnalysisKind::Strategy => STRATEGY_TYPES,
            AnalysisKind::Market => MARKET_TYPES,
            AnalysisKind::Financial => FINANCIAL_TYPES,
            AnalysisKind::Operations => OPERATIONS_TYPES,
        }
    }

    pub fn capabilities(self) -> Value {
        json!({
            "kind": self,
            "label": self.label(),
            "requiredFields": self.required_fields(),
            "analysisTypes": self.analysis_types(),
        })
    }

    fn id_prefix(self) -> &'static str {
        match self {
            AnalysisKind::Strategy => "STR",
            AnalysisKind::Market => "MI",
            AnalysisKind::Financial => "FIN",
            AnalysisKind::Operations => "OPS",
        }
    }

    pub fn system_prompt(self) -> &'static str {
        match self {
            AnalysisKind::Strategy => {
                "You are a senior strategy consultant. You produce structured, actionable strategic analyses."
            }
            AnalysisKind::Market => {
                "You are a senior market intelligence analyst. You produce data-driven market and competitive analyses."
            }
            AnalysisKind::Financial => {
                "You are a senior financial analyst. You produce ratio, valuation and planning analyses with concrete recommendations."
            }
            AnalysisKind::Operations => {
                "You are a senior operations consultant. You produce process and efficiency analyses with concrete recommendations."
            }
        }
    }

    pub fn missing_fields(self, params: &AnalysisParameters) -> Vec<&'static str> {
        self.required_fields()
            .iter()
            .copied()
            .filter(|field| param_str(params, field).is_none())
            .collect()
    }

    pub fn prompt(self, params: &AnalysisParameters) -> String {
        let mut keys: Vec<&String> = params.keys().collect();
        keys.sort();

        let client_data = keys
            .into_iter()
            .map(|k| format!("- {}: {}", k, render_value(&params[k])))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Prepare a {label} for the client described below.\n\n\
             CLIENT DATA:\n{client_data}\n\n\
             Respond with a single valid JSON object with the keys \"title\", \"summary\", \
             \"recommendations\", \"insights\" and \"metrics\". Do not include any text outside the JSON object.",
            label = self.label(),
        )
    }

    pub fn report_title(self, params: &AnalysisParameters) -> String {
        let title = match self {
            AnalysisKind::Strategy => format!(
                "{} - {}",
                self.label(),
                param_str(params, "industry").unwrap_or("General")
            ),
            _ => format!(
                "{} - {} ({})",
                self.label(),
                param_str(params, "company").unwrap_or("Unknown company"),
                param_str(params, "analysisType").unwrap_or("general")
            ),
        };
        title.chars().take(100).collect()
    }

    pub fn analysis_id(self, now: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}_{}_{}", self.id_prefix(), now.timestamp_millis(), &suffix[..9])
    }

    /// Locally built stand-in returned when generation fails.
    pub fn placeholder_report(self, params: &AnalysisParameters, now: DateTime<Utc>) -> Value {
        let subject = param_str(params, "company")
            .or_else(|| param_str(params, "industry"))
            .unwrap_or("your organisation");

        json!({
            "type": self.label(),
            "title": format!("{} Report", self.label()),
            "summary": format!(
                "The automated {} for {} could not be completed. The outline below can be used until the analysis is retried.",
                self.label().to_lowercase(),
                subject
            ),
            "recommendations": [
                {
                    "title": "Confirm the core question",
                    "description": "Restate the decision this analysis must support and the metrics that define success.",
                    "impact": "High",
                    "timeline": param_str(params, "implementationTimeline")
                        .or_else(|| param_str(params, "timeframe"))
                        .unwrap_or("6-12 months"),
                    "priority": 1
                }
            ],
            "insights": [],
            "metrics": {},
            "placeholder": true,
            "timestamp": now.to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOption {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub estimated_time: &'static str,
    pub data_points: &'static [&'static str],
}

const STRATEGY_TYPES: &[AnalysisOption] = &[
    AnalysisOption {
        id: "growth-strategy",
        name: "Growth Strategy",
        description: "Growth options, priorities and a phased plan for the core challenge",
        estimated_time: "15-20 minutes",
        data_points: &["Growth levers", "Strategic options", "Prioritisation", "Roadmap"],
    },
    AnalysisOption {
        id: "competitive-positioning",
        name: "Competitive Positioning",
        description: "Where the business can win against current competitors",
        estimated_time: "15-20 minutes",
        data_points: &["Differentiators", "Competitor moves", "Positioning gaps", "Value proposition"],
    },
    AnalysisOption {
        id: "turnaround",
        name: "Turnaround & Restructuring",
        description: "Stabilisation and recovery plan for an underperforming business",
        estimated_time: "20-25 minutes",
        data_points: &["Root causes", "Quick wins", "Cost actions", "Recovery milestones"],
    },
];

const MARKET_TYPES: &[AnalysisOption] = &[
    AnalysisOption {
        id: "market-size-growth",
        name: "Market Size & Growth Analysis",
        description: "Market size, growth rates and projections for the target market",
        estimated_time: "15-20 minutes",
        data_points: &["Market size", "Growth rates", "Market segments", "Future projections"],
    },
    AnalysisOption {
        id: "competitive-landscape",
        name: "Competitive Landscape Assessment",
        description: "Competitors, market share and competitive positioning",
        estimated_time: "20-25 minutes",
        data_points: &["Key competitors", "Market share", "Competitive positioning", "SWOT analysis"],
    },
    AnalysisOption {
        id: "industry-trends",
        name: "Industry Trend Analysis",
        description: "Emerging trends, disruptions and how the industry is changing",
        estimated_time: "15-20 minutes",
        data_points: &["Emerging trends", "Technology disruption", "Consumer behavior", "Regulatory changes"],
    },
    AnalysisOption {
        id: "customer-insights",
        name: "Customer Behavior Insights",
        description: "Customer segments, preferences and buying behaviour",
        estimated_time: "20-25 minutes",
        data_points: &["Customer segments", "Buying patterns", "Preferences", "Pain points"],
    },
    AnalysisOption {
        id: "market-entry",
        name: "Market Entry Strategy",
        description: "Entry barriers, opportunities and go-to-market options",
        estimated_time: "25-30 minutes",
        data_points: &["Entry barriers", "Market opportunities", "Entry strategies", "Risk assessment"],
    },
    AnalysisOption {
        id: "threat-opportunity",
        name: "Threat & Opportunity Assessment",
        description: "Market threats and opportunities with their likely impact",
        estimated_time: "20-25 minutes",
        data_points: &["Market threats", "Growth opportunities", "Risk factors", "Strategic implications"],
    },
];

const FINANCIAL_TYPES: &[AnalysisOption] = &[
    AnalysisOption {
        id: "financial-health",
        name: "Financial Health Assessment",
        description: "Overall financial health through ratio analysis",
        estimated_time: "20-25 minutes",
        data_points: &["Liquidity ratios", "Profitability ratios", "Leverage ratios", "Efficiency ratios"],
    },
    AnalysisOption {
        id: "profitability-analysis",
        name: "Profitability Analysis",
        description: "Margins, cost structure and profit drivers",
        estimated_time: "15-20 minutes",
        data_points: &["Gross margin", "Operating margin", "Net margin", "Profit drivers"],
    },
    AnalysisOption {
        id: "liquidity-cashflow",
        name: "Liquidity & Cash Flow Analysis",
        description: "Cash flow patterns, liquidity position and working capital",
        estimated_time: "20-25 minutes",
        data_points: &["Operating cash flow", "Free cash flow", "Working capital", "Cash conversion cycle"],
    },
    AnalysisOption {
        id: "investment-valuation",
        name: "Investment Valuation",
        description: "Company valuation using several methods",
        estimated_time: "25-30 minutes",
        data_points: &["DCF valuation", "Comparable multiples", "Asset valuation", "Fair value range"],
    },
    AnalysisOption {
        id: "risk-credit-analysis",
        name: "Risk Assessment & Credit Analysis",
        description: "Financial risk and creditworthiness",
        estimated_time: "20-25 minutes",
        data_points: &["Credit metrics", "Default risk", "Debt capacity", "Risk factors"],
    },
    AnalysisOption {
        id: "budget-actual",
        name: "Budget vs Actual Analysis",
        description: "Variance between budgeted and actual performance",
        estimated_time: "15-20 minutes",
        data_points: &["Budget variances", "Performance metrics", "Forecast accuracy", "Trend analysis"],
    },
];

const OPERATIONS_TYPES: &[AnalysisOption] = &[
    AnalysisOption {
        id: "process-optimization",
        name: "Process Optimization & Efficiency",
        description: "Process efficiency, bottlenecks and improvement opportunities",
        estimated_time: "20-25 minutes",
        data_points: &["Process mapping", "Bottlenecks", "Cycle times", "Improvement opportunities"],
    },
    AnalysisOption {
        id: "supply-chain",
        name: "Supply Chain Analysis",
        description: "Supply chain performance, risks and optimization",
        estimated_time: "25-30 minutes",
        data_points: &["Supplier performance", "Inventory levels", "Logistics costs", "Supply risks"],
    },
    AnalysisOption {
        id: "quality-management",
        name: "Quality Management Assessment",
        description: "Quality systems, defect rates and improvement plans",
        estimated_time: "20-25 minutes",
        data_points: &["Quality metrics", "Defect rates", "Root causes", "Quality systems"],
    },
    AnalysisOption {
        id: "cost-reduction",
        name: "Cost Reduction Analysis",
        description: "Cost drivers and savings opportunities",
        estimated_time: "20-25 minutes",
        data_points: &["Cost breakdown", "Cost drivers", "Savings opportunities", "Implementation plan"],
    },
    AnalysisOption {
        id: "workflow-productivity",
        name: "Workflow & Productivity Analysis",
        description: "Workflow design and workforce productivity",
        estimated_time: "15-20 minutes",
        data_points: &["Productivity metrics", "Workflow design", "Resource utilization", "Automation potential"],
    },
    AnalysisOption {
        id: "technology-integration",
        name: "Technology Integration Assessment",
        description: "Technology use, integration gaps and automation",
        estimated_time: "20-25 minutes",
        data_points: &["System integration", "Automation potential", "Digital maturity", "Technology roadmap"],
    },
];

fn param_str<'a>(params: &'a AnalysisParameters, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(render_value).collect::<Vec<_>>().join(", "),
        Value::Null => "not provided".to_string(),
        other => other.to_string(),
    }
}
