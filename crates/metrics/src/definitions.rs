//! Metric name and label definitions.
//!
//! Centralizing these as constants keeps metric names consistent between the
//! emitting call site and any dashboard/alert that references them.

/// HTTP request metrics
pub mod http {
    pub const REQUESTS_TOTAL: &str = "fluidmcp_http_requests_total";
    pub const REQUEST_DURATION_SECONDS: &str = "fluidmcp_http_request_duration_seconds";
    pub const REQUESTS_IN_FLIGHT: &str = "fluidmcp_http_requests_in_flight";
}

/// MCP server lifecycle and tool-call metrics
pub mod mcp {
    pub const SERVER_CONNECTIONS_TOTAL: &str = "fluidmcp_mcp_server_connections_total";
    pub const SERVERS_CONNECTED: &str = "fluidmcp_mcp_servers_connected";
    pub const TOOL_CALLS_TOTAL: &str = "fluidmcp_mcp_tool_calls_total";
    pub const TOOL_CALL_DURATION_SECONDS: &str = "fluidmcp_mcp_tool_call_duration_seconds";
    pub const TOOL_CALL_ERRORS_TOTAL: &str = "fluidmcp_mcp_tool_call_errors_total";
}

/// Server Manager / restart policy metrics
pub mod manager {
    pub const SERVERS_RUNNING: &str = "fluidmcp_manager_servers_running";
    pub const STARTS_TOTAL: &str = "fluidmcp_manager_starts_total";
    pub const START_FAILURES_TOTAL: &str = "fluidmcp_manager_start_failures_total";
    pub const RESTARTS_TOTAL: &str = "fluidmcp_manager_restarts_total";
    pub const RESTART_BUDGET_EXHAUSTED_TOTAL: &str =
        "fluidmcp_manager_restart_budget_exhausted_total";
    pub const STOPS_TOTAL: &str = "fluidmcp_manager_stops_total";
    pub const WATCHDOG_PROBES_TOTAL: &str = "fluidmcp_manager_watchdog_probes_total";
}

/// Tool registry / executor / router metrics
pub mod tools {
    pub const REGISTERED: &str = "fluidmcp_tools_registered";
    pub const EXECUTIONS_TOTAL: &str = "fluidmcp_tool_executions_total";
    pub const EXECUTION_DURATION_SECONDS: &str = "fluidmcp_tool_execution_duration_seconds";
    pub const EXECUTION_ERRORS_TOTAL: &str = "fluidmcp_tool_execution_errors_total";
    pub const EXECUTIONS_IN_FLIGHT: &str = "fluidmcp_tool_executions_in_flight";
    pub const ROUTER_ITERATIONS_TOTAL: &str = "fluidmcp_router_iterations_total";
}

/// LLM dispatcher metrics
pub mod llm {
    pub const COMPLETIONS_TOTAL: &str = "fluidmcp_llm_completions_total";
    pub const COMPLETION_DURATION_SECONDS: &str = "fluidmcp_llm_completion_duration_seconds";
    pub const COMPLETION_ERRORS_TOTAL: &str = "fluidmcp_llm_completion_errors_total";
}

/// Gateway auth metrics
pub mod auth {
    pub const REQUESTS_TOTAL: &str = "fluidmcp_auth_requests_total";
    pub const FAILURES_TOTAL: &str = "fluidmcp_auth_failures_total";
}

/// Persistence repository metrics
pub mod persistence {
    pub const LOG_BUFFER_SIZE: &str = "fluidmcp_persistence_log_buffer_size";
    pub const LOG_WRITE_FAILURES_TOTAL: &str = "fluidmcp_persistence_log_write_failures_total";
    pub const LOG_WRITE_SUCCESS_TOTAL: &str = "fluidmcp_persistence_log_write_success_total";
}

/// System/runtime metrics
pub mod system {
    pub const UPTIME_SECONDS: &str = "fluidmcp_uptime_seconds";
    pub const BUILD_INFO: &str = "fluidmcp_build_info";
}

/// Common label keys used across metrics
pub mod labels {
    pub const ENDPOINT: &str = "endpoint";
    pub const METHOD: &str = "method";
    pub const STATUS: &str = "status";
    pub const SERVER: &str = "server";
    pub const TOOL: &str = "tool";
    pub const MODEL: &str = "model";
    pub const BACKEND: &str = "backend";
    pub const ERROR_TYPE: &str = "error_type";
    pub const SUCCESS: &str = "success";
}

/// Standard histogram buckets for different metric types
pub mod buckets {
    use once_cell::sync::Lazy;

    /// HTTP request duration buckets (in seconds). Covers 1ms to 60s.
    pub static HTTP_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ]
    });

    /// LLM completion duration buckets (in seconds). Covers 100ms to 5 minutes.
    pub static LLM_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0, 60.0, 120.0, 180.0, 300.0,
        ]
    });

    /// Tool execution duration buckets (in seconds). Covers 1ms to 5 minutes.
    pub static TOOL_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
        ]
    });
}
