//! 스캔 컨텍스트: 취소 토큰과 tracing span 전달
//!
//! Controller → Runner → Scanner 순서로 명시적으로 전달됩니다.
//! 하위 단계는 [`ScanContext::child`]로 자식 토큰과 자기 span을 가진 컨텍스트를 만듭니다.
//! 부모가 취소되면 모든 자식이 함께 취소됩니다.

use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::error::ScanError;

/// 스캔 컨텍스트
#[derive(Debug, Clone)]
pub struct ScanContext {
    cancel: CancellationToken,
    span: Span,
}

impl ScanContext {
    /// 새 컨텍스트를 생성합니다.
    pub fn new(cancel: CancellationToken, span: Span) -> Self {
        Self { cancel, span }
    }

    /// 취소되지 않는 독립 컨텍스트 (테스트, 단발성 스캔용)
    pub fn detached() -> Self {
        Self::new(CancellationToken::new(), Span::none())
    }

    /// 자식 토큰과 주어진 span을 가진 하위 컨텍스트를 생성합니다.
    pub fn child(&self, span: Span) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            span,
        }
    }

    /// 취소 토큰
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 현재 span
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// 취소 여부
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 취소되었으면 [`ScanError::Cancelled`]를 반환합니다.
    ///
    /// 스캐너는 아카이브 엔트리마다 이 함수를 호출합니다.
    pub fn check(&self) -> Result<(), ScanError> {
        if self.cancel.is_cancelled() {
            Err(ScanError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_context_is_live() {
        let ctx = ScanContext::detached();
        assert!(!ctx.is_cancelled());
        ctx.check().unwrap();
    }

    #[test]
    fn parent_cancel_reaches_child() {
        let parent = ScanContext::detached();
        let child = parent.child(Span::none());
        parent.cancel_token().cancel();
        assert!(child.is_cancelled());
        assert!(matches!(child.check(), Err(ScanError::Cancelled)));
    }

    #[test]
    fn child_cancel_does_not_reach_parent() {
        let parent = ScanContext::detached();
        let child = parent.child(Span::none());
        child.cancel_token().cancel();
        assert!(!parent.is_cancelled());
    }
}
